/*!
 # Tradfri mood controller

 A Rust library for switching moods on an IKEA Tradfri gateway depending on
 the on/off state of one designated bulb. Intended to be driven from cron or
 a similar scheduler to get simple conditional automation: "if bulb X is on,
 activate mood A on group G; otherwise activate mood B".

 The gateway speaks CoAP over DTLS with a pre-shared key. Framing and the
 secure transport are delegated to `coap-lite` and `openssl`; this crate
 only glues them into a blocking request session and a typed command layer.

 ## Features

 * One-time pairing: exchange the gateway's security code for a durable PSK
 * Persistent per-host credential store (`tradfri_standalone_psk.conf`)
 * Group, device and mood lookups by name
 * Mood activation on a group

 ## Example

 ```no_run
 use tradfri_mood::{Gateway, Session};

 fn main() -> tradfri_mood::Result<()> {
     // Credentials come from a previous pairing run, see `PskStore`.
     let session = Session::connect("192.168.178.45", "a1b2c3d4", "secret-psk")?;
     let mut gateway = Gateway::new(session);

     // Activate "FOCUS" if the bulb named "light" is on, "FOCUS OFF" if not.
     let mood = gateway.change_mood("bathroom", "light", "FOCUS", "FOCUS OFF")?;
     println!("activated {}", mood.name);

     Ok(())
 }
 ```
*/

use thiserror::Error;

/// Custom error types for the Tradfri mood controller library
#[derive(Error, Debug)]
pub enum Error {
    /// The interactively entered security code was not 16 characters
    #[error("Invalid 'Security Code' provided")]
    InvalidSecurityCode,

    /// First-time pairing was attempted without a security code
    #[error("Please provide the 'Security Code' on the back of your Tradfri gateway using the -K flag")]
    MissingSecurityCode,

    /// No group with the requested name exists on the gateway
    #[error("No group named '{0}' found on the gateway")]
    GroupNotFound(String),

    /// No member with the requested name exists in the group
    #[error("No member named '{0}' found in group '{1}'")]
    MemberNotFound(String, String),

    /// No mood with the requested name is available for the group
    #[error("No mood named '{0}' available for group '{1}'")]
    MoodNotFound(String, String),

    /// The state-determining member is not a light
    #[error("Device '{0}' has no light control to read a state from")]
    NotALight(String),

    /// DTLS connection to the gateway could not be established
    #[error("DTLS handshake with the gateway failed: {0}")]
    Handshake(String),

    /// The gateway answered a request with an error response code
    #[error("Gateway replied {code} to request for {path}")]
    ErrorResponse {
        /// CoAP response class returned by the gateway
        code: String,
        /// Request path the response belongs to
        path: String,
    },

    /// No response matching the request token arrived
    #[error("Gateway did not return a matching response")]
    UnexpectedResponse,

    /// The pairing exchange completed without yielding a key
    #[error("Gateway key exchange did not return a pre-shared key")]
    KeyExchangeFailed,

    /// Malformed JSON payload from the gateway or the credential file
    #[error("Malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// CoAP message could not be encoded or decoded
    #[error("CoAP message error: {0}")]
    Message(#[from] coap_lite::error::MessageError),

    /// Error from the TLS library
    #[error(transparent)]
    Tls(#[from] openssl::error::ErrorStack),

    /// Underlying socket or file I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

// Re-export modules
pub mod gateway;
pub mod session;
pub mod store;

// Re-export key types
pub use gateway::{Api, Device, Gateway, Group, Light, Method, Mood};
pub use session::Session;
pub use store::{Credentials, PskStore, CONFIG_FILE};
