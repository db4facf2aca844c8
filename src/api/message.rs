//! Purpose: JSON request/response envelopes for the apply, plan, and refresh routes.
//! Exports: `Request`, `Response`.
//! Role: Wire contract; field names are PascalCase to match existing clients, matched case-insensitively on input.
//! Invariants: `Config` and `State` are raw JSON documents passed through byte-for-byte.
//! Invariants: `Plan` is a base64 (standard alphabet) string on the wire in both directions.
//! Invariants: Empty response fields are omitted except `ExitCode`.
use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde::de::Error as _;
use serde_json::value::RawValue;

use crate::core::error::{Error, ErrorKind};
use crate::core::staging::StageContents;
use crate::core::ui::BufferUi;

/// Decoded request body. Keys match in any letter case (`State`, `state`,
/// `STATE`); when several spellings appear, the exact PascalCase one wins.
/// Unknown keys are ignored.
#[derive(Debug, Default)]
pub struct Request {
    pub config: Option<Box<RawValue>>,
    pub plan: Vec<u8>,
    pub state: Option<Box<RawValue>>,
}

const FIELDS: [&str; 3] = ["Config", "Plan", "State"];

impl Request {
    pub fn from_slice(body: &[u8]) -> Result<Self, Error> {
        Self::decode(body).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("error parsing JSON: {err}"))
                .with_source(err)
        })
    }

    fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        let fields: BTreeMap<String, Box<RawValue>> = serde_json::from_slice(body)?;
        let mut fields: Vec<_> = fields.into_iter().collect();
        // Exact spellings sort last so they overwrite case-folded matches.
        fields.sort_by_key(|(key, _)| FIELDS.contains(&key.as_str()));

        let mut request = Self::default();
        for (key, value) in fields {
            if key.eq_ignore_ascii_case("config") {
                request.config = document(value);
            } else if key.eq_ignore_ascii_case("plan") {
                request.plan = decode_plan(&value)?;
            } else if key.eq_ignore_ascii_case("state") {
                request.state = document(value);
            }
        }
        Ok(request)
    }

    pub fn contents(&self) -> StageContents<'_> {
        StageContents {
            config: raw_bytes(self.config.as_deref()),
            plan: &self.plan,
            state: raw_bytes(self.state.as_deref()),
        }
    }
}

fn document(value: Box<RawValue>) -> Option<Box<RawValue>> {
    (value.get() != "null").then_some(value)
}

fn raw_bytes(value: Option<&RawValue>) -> &[u8] {
    value.map(|raw| raw.get().as_bytes()).unwrap_or_default()
}

fn decode_plan(value: &RawValue) -> Result<Vec<u8>, serde_json::Error> {
    let Some(encoded) = serde_json::from_str::<Option<String>>(value.get())? else {
        return Ok(Vec::new());
    };
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(|err| serde_json::Error::custom(format!("Plan is not valid base64: {err}")))
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub plan: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ask: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub info: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub exit_code: i32,
}

impl Response {
    /// Packages a finished run's captured channels and exit code.
    pub fn from_run(ui: BufferUi, exit_code: i32) -> Self {
        Self {
            ask: ui.ask,
            info: ui.info,
            output: ui.output,
            error: ui.error,
            exit_code,
            ..Self::default()
        }
    }

    pub fn set_plan(&mut self, plan: &[u8]) {
        self.plan = STANDARD.encode(plan);
    }

    /// Embeds the state document read back from disk. An empty file means no state.
    pub fn set_state(&mut self, state: Vec<u8>) -> Result<(), Error> {
        if state.iter().all(u8::is_ascii_whitespace) {
            self.state = None;
            return Ok(());
        }
        let text = String::from_utf8(state).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("state on disk is not valid UTF-8")
                .with_source(err)
        })?;
        let raw = RawValue::from_string(text.trim().to_string()).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("state on disk is not valid JSON")
                .with_source(err)
        })?;
        self.state = Some(raw);
        Ok(())
    }
}
