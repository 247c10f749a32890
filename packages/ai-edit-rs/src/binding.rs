use napi::bindgen_prelude::Result as NapiResult;
use napi_derive::napi;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::client::HttpGenerationClient;
use crate::config::{EditorConfig, EditorOptions};
use crate::logging::{self, LogEmitter};
use crate::runner::SessionRunner;

fn to_napi_error(error: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(error.to_string())
}

fn parse_input<T: DeserializeOwned>(value: Value, label: &str) -> NapiResult<T> {
    serde_json::from_value(value)
        .map_err(|error| to_napi_error(format!("Invalid {label}: {error}")))
}

#[napi(js_name = "EditSession")]
pub struct EditSessionBinding {
    runner: SessionRunner<HttpGenerationClient>,
    logs: &'static LogEmitter,
}

#[napi]
impl EditSessionBinding {
    #[napi(constructor)]
    pub fn new(initial_markdown: String, options: Option<Value>) -> NapiResult<Self> {
        let options = match options {
            Some(value) => parse_input::<EditorOptions>(value, "editor options")?,
            None => EditorOptions::default(),
        };
        let config =
            EditorConfig::from_options(Some(options.apply_env())).map_err(to_napi_error)?;
        let logs = logging::init(config.level_filter());
        let runner =
            SessionRunner::from_config(&config, &initial_markdown).map_err(to_napi_error)?;
        Ok(Self { runner, logs })
    }

    #[napi]
    pub fn select(&self, text: String) -> NapiResult<()> {
        self.runner.select(&text).map_err(to_napi_error)
    }

    /// Resolves once the generation reaches a terminal state.
    #[napi]
    pub async fn submit(&self, prompt: String) -> NapiResult<Value> {
        let outcome = self.runner.submit(&prompt).await.map_err(to_napi_error)?;
        serde_json::to_value(outcome).map_err(to_napi_error)
    }

    #[napi]
    pub fn accept(&self) -> NapiResult<bool> {
        self.runner.accept().map_err(to_napi_error)
    }

    #[napi]
    pub fn reject(&self) -> NapiResult<bool> {
        self.runner.reject().map_err(to_napi_error)
    }

    #[napi]
    pub fn undo(&self) -> NapiResult<bool> {
        self.runner.undo().map_err(to_napi_error)
    }

    #[napi]
    pub fn redo(&self) -> NapiResult<bool> {
        self.runner.redo().map_err(to_napi_error)
    }

    #[napi(js_name = "editMarkdown")]
    pub fn edit_markdown(&self, markdown: String) -> NapiResult<bool> {
        self.runner.edit_markdown(&markdown).map_err(to_napi_error)
    }

    #[napi(js_name = "dismissError")]
    pub fn dismiss_error(&self) -> NapiResult<()> {
        self.runner.dismiss_error().map_err(to_napi_error)
    }

    #[napi(js_name = "getView")]
    pub fn get_view(&self) -> NapiResult<Value> {
        let view = self.runner.view().map_err(to_napi_error)?;
        serde_json::to_value(view).map_err(to_napi_error)
    }

    #[napi(js_name = "drainLogs")]
    pub fn drain_logs(&self) -> NapiResult<Value> {
        serde_json::to_value(self.logs.drain()).map_err(to_napi_error)
    }
}
