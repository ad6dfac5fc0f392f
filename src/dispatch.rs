//! Command surface.
//!
//! The framework talks to a session through named method calls carrying a
//! JSON argument bag. This module decodes those calls, runs them against a
//! `PortSession`, and encodes the outcome.

use crate::error::{BridgeError, BridgeResult};
use crate::port::{DataBits, FlowControl, LineParameters, Parity, StopBits};
use crate::session::PortSession;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// A command addressed to one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }

    /// A call without arguments.
    pub fn bare(method: impl Into<String>) -> Self {
        Self::new(method, Value::Null)
    }

    /// Decode the argument `name`.
    pub fn argument<T: DeserializeOwned>(&self, name: &str) -> BridgeResult<T> {
        let value = self
            .arguments
            .get(name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| BridgeError::invalid_argument(name, "missing"))?;
        T::deserialize(value).map_err(|e| BridgeError::invalid_argument(name, e.to_string()))
    }
}

/// Outcome of a method call as reported back to the framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MethodResult {
    Success { value: Value },
    Error { code: String, message: String },
    NotImplemented,
}

impl MethodResult {
    pub fn success(value: impl Into<Value>) -> Self {
        Self::Success {
            value: value.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Error code, if this is an error result.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Error { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<BridgeError> for MethodResult {
    fn from(err: BridgeError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<BridgeResult<Value>> for MethodResult {
    fn from(result: BridgeResult<Value>) -> Self {
        match result {
            Ok(value) => Self::Success { value },
            Err(e) => e.into(),
        }
    }
}

/// Methods a session understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Open,
    Close,
    Write,
    SetPortParameters,
    SetFlowControl,
    SetDtr,
    SetRts,
}

impl Method {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "open" => Some(Self::Open),
            "close" => Some(Self::Close),
            "write" => Some(Self::Write),
            "setPortParameters" => Some(Self::SetPortParameters),
            "setFlowControl" => Some(Self::SetFlowControl),
            "setDTR" => Some(Self::SetDtr),
            "setRTS" => Some(Self::SetRts),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Write => "write",
            Self::SetPortParameters => "setPortParameters",
            Self::SetFlowControl => "setFlowControl",
            Self::SetDtr => "setDTR",
            Self::SetRts => "setRTS",
        }
    }
}

/// Decode `baudRate`, `dataBits`, `stopBits` and `parity`.
pub fn line_parameters_from(call: &MethodCall) -> BridgeResult<LineParameters> {
    let baud_rate: u32 = call.argument("baudRate")?;
    if baud_rate == 0 {
        return Err(BridgeError::invalid_argument("baudRate", "must be positive"));
    }

    let code: i64 = call.argument("dataBits")?;
    let data_bits = DataBits::from_code(code).ok_or_else(|| {
        BridgeError::invalid_argument("dataBits", format!("unknown data bits code {code}"))
    })?;

    let code: i64 = call.argument("stopBits")?;
    let stop_bits = StopBits::from_code(code).ok_or_else(|| {
        BridgeError::invalid_argument("stopBits", format!("unknown stop bits code {code}"))
    })?;

    let code: i64 = call.argument("parity")?;
    let parity = Parity::from_code(code).ok_or_else(|| {
        BridgeError::invalid_argument("parity", format!("unknown parity code {code}"))
    })?;

    Ok(LineParameters {
        baud_rate,
        data_bits,
        stop_bits,
        parity,
    })
}

impl PortSession {
    /// Run one framework command against this session.
    ///
    /// `open` and `close` answer `true`, `write` answers the number of bytes
    /// written, everything else answers `null`.
    pub fn handle_method_call(&self, call: &MethodCall) -> MethodResult {
        let Some(method) = Method::from_name(&call.method) else {
            debug!(interface_id = self.interface_id(), method = %call.method, "method not implemented");
            return MethodResult::NotImplemented;
        };
        debug!(interface_id = self.interface_id(), method = method.name(), "method call");
        self.dispatch(method, call).into()
    }

    fn dispatch(&self, method: Method, call: &MethodCall) -> BridgeResult<Value> {
        match method {
            Method::Open => {
                self.open()?;
                Ok(Value::Bool(true))
            }
            Method::Close => {
                self.close()?;
                Ok(Value::Bool(true))
            }
            Method::Write => {
                let data: Vec<u8> = call.argument("data")?;
                let written = self.write(&data)?;
                Ok(json!(written))
            }
            Method::SetPortParameters => {
                self.set_port_parameters(line_parameters_from(call)?)?;
                Ok(Value::Null)
            }
            Method::SetFlowControl => {
                let code: i64 = call.argument("flowControl")?;
                let flow = FlowControl::from_code(code).ok_or_else(|| {
                    BridgeError::invalid_argument(
                        "flowControl",
                        format!("unknown flow control code {code}"),
                    )
                })?;
                self.set_flow_control(flow)?;
                Ok(Value::Null)
            }
            Method::SetDtr => {
                self.set_dtr(call.argument("value")?)?;
                Ok(Value::Null)
            }
            Method::SetRts => {
                self.set_rts(call.argument("value")?)?;
                Ok(Value::Null)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_method_names_roundtrip() {
        for method in [
            Method::Open,
            Method::Close,
            Method::Write,
            Method::SetPortParameters,
            Method::SetFlowControl,
            Method::SetDtr,
            Method::SetRts,
        ] {
            assert_eq!(Method::from_name(method.name()), Some(method));
        }
        assert_eq!(Method::from_name("setDtr"), None);
    }

    #[test]
    fn test_argument_decoding() {
        let call = MethodCall::new("write", json!({"data": [1, 2, 255], "value": true}));
        assert_eq!(call.argument::<Vec<u8>>("data").unwrap(), vec![1, 2, 255]);
        assert!(call.argument::<bool>("value").unwrap());

        let err = call.argument::<bool>("missing").unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");

        let bad = MethodCall::new("write", json!({"data": [256]}));
        assert!(bad.argument::<Vec<u8>>("data").is_err());

        let null = MethodCall::new("setDTR", json!({"value": null}));
        assert!(null.argument::<bool>("value").is_err());
    }

    #[test]
    fn test_line_parameters_decoding() {
        let call = MethodCall::new(
            "setPortParameters",
            json!({"baudRate": 115200, "dataBits": 8, "stopBits": 3, "parity": 2}),
        );
        let params = line_parameters_from(&call).unwrap();
        assert_eq!(
            params,
            LineParameters {
                baud_rate: 115200,
                data_bits: DataBits::Eight,
                stop_bits: StopBits::OnePointFive,
                parity: Parity::Even,
            }
        );
    }

    #[test]
    fn test_line_parameters_rejects_unknown_codes() {
        let cases = [
            (json!({"baudRate": 0, "dataBits": 8, "stopBits": 1, "parity": 0}), "baudRate"),
            (json!({"baudRate": 9600, "dataBits": 9, "stopBits": 1, "parity": 0}), "dataBits"),
            (json!({"baudRate": 9600, "dataBits": 8, "stopBits": 4, "parity": 0}), "stopBits"),
            (json!({"baudRate": 9600, "dataBits": 8, "stopBits": 1, "parity": 7}), "parity"),
            (json!({"dataBits": 8, "stopBits": 1, "parity": 0}), "baudRate"),
        ];
        for (args, field) in cases {
            let call = MethodCall::new("setPortParameters", args);
            match line_parameters_from(&call) {
                Err(BridgeError::InvalidArgument { name, .. }) => assert_eq!(name, field),
                other => panic!("expected InvalidArgument for {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_result_serialization() {
        let ok = serde_json::to_value(MethodResult::success(true)).unwrap();
        assert_eq!(ok, json!({"status": "success", "value": true}));

        let err: MethodResult = BridgeError::NotOpen.into();
        assert_eq!(err.error_code(), Some("PortNotOpen"));
        let encoded = serde_json::to_value(&err).unwrap();
        assert_eq!(encoded["status"], "error");
        assert_eq!(encoded["code"], "PortNotOpen");

        let missing = serde_json::to_value(MethodResult::NotImplemented).unwrap();
        assert_eq!(missing, json!({"status": "not_implemented"}));
    }

    #[test]
    fn test_method_call_parses_without_arguments() {
        let call: MethodCall = serde_json::from_str(r#"{"method": "open"}"#).unwrap();
        assert_eq!(call, MethodCall::bare("open"));
    }
}
