use std::path::Path;

use async_trait::async_trait;
use log::info;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

pub mod process;
pub use process::ProcessTransport;

#[async_trait]
pub trait HelperTransport: Send + Sync {
    /// Run `program` once with `input` on its stdin and return everything
    /// it wrote to stdout.  Exit status is not part of the contract.
    async fn invoke(&self, program: &Path, input: &[u8]) -> Result<Vec<u8>>;
}

/// Send one typed request to a helper and decode its typed response.
pub async fn call<Req, Resp>(
    transport: &dyn HelperTransport,
    program: &Path,
    request: &Req,
) -> Result<Resp>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let encoded = serde_json::to_string(request).map_err(|e| Error::ProtocolDecode {
        program: program.to_path_buf(),
        reason: format!("failed to encode request: {}", e),
    })?;

    info!("Sending command to {}: {}", program.display(), encoded);
    let output = transport.invoke(program, encoded.as_bytes()).await?;
    let output = String::from_utf8_lossy(&output);
    info!("Got response from {}: {}", program.display(), output.trim_end());

    decode_response(program, &output)
}

/// Parse a helper response document.
///
/// A non-null `error` member wins over everything else; otherwise the
/// member is dropped and the remaining object decoded as `Resp`.
pub fn decode_response<Resp>(program: &Path, output: &str) -> Result<Resp>
where
    Resp: DeserializeOwned,
{
    let decode_err = |reason: String| Error::ProtocolDecode {
        program: program.to_path_buf(),
        reason,
    };

    let document: Value = serde_json::from_str(output)
        .map_err(|e| decode_err(format!("error parsing output '{}' as JSON: {}", output, e)))?;

    let Value::Object(mut fields) = document else {
        return Err(decode_err(format!(
            "expected a JSON object, got '{}'",
            output
        )));
    };

    match fields.remove("error") {
        None | Some(Value::Null) => {}
        Some(Value::String(message)) => {
            return Err(Error::HelperReported {
                program: program.to_path_buf(),
                message,
            })
        }
        Some(other) => {
            return Err(Error::HelperReported {
                program: program.to_path_buf(),
                message: other.to_string(),
            })
        }
    }

    serde_json::from_value(Value::Object(fields))
        .map_err(|e| decode_err(format!("unexpected response '{}': {}", output, e)))
}
