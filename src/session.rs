/*!
 # Blocking request session to the gateway

 The gateway listens on UDP port 5684 and speaks CoAP secured by DTLS with
 a pre-shared key. `coap-lite` builds and parses the PDUs, `openssl` runs
 the handshake and record layer; this module connects the two over one
 connected UDP socket.

 Requests are confirmable and strictly sequential: one request, one
 response, matched by token. There are no retries and no timeout handling
 beyond the socket read timeout.
*/

use std::io::{self, Read, Write};
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use coap_lite::{
    CoapRequest, ContentFormat, MessageClass, MessageType, Packet, RequestType, ResponseType,
};
use openssl::ssl::{Ssl, SslContext, SslMethod, SslStream};
use serde::Deserialize;
use tracing::{debug, info, instrument, trace};

use crate::gateway::{Api, Method};
use crate::{Error, Result};

/// UDP port the gateway serves CoAP/DTLS on
pub const GATEWAY_PORT: u16 = 5684;

/// Well-known identity used for the one-time pairing handshake
const PAIRING_IDENTITY: &str = "Client_identity";
/// The only ciphersuite the gateway accepts
const PSK_CIPHER: &str = "PSK-AES128-CCM8";
/// Resource the pairing exchange is POSTed to
const KEY_EXCHANGE_PATH: &str = "15011/9063";

/// How long a read waits for the gateway before giving up
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// A connected UDP socket presented as a byte stream, one datagram per
/// read/write, which is what openssl's DTLS layer expects to drive.
#[derive(Debug)]
struct UdpChannel(UdpSocket);

impl Read for UdpChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.recv(buf)
    }
}

impl Write for UdpChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.send(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An authenticated DTLS session executing CoAP requests one at a time
pub struct Session {
    stream: SslStream<UdpChannel>,
    message_id: u16,
}

impl Session {
    /// Connects to `host` and runs the DTLS handshake with the given PSK
    /// identity and key.
    ///
    /// For normal operation the identity/key pair comes from the credential
    /// store; first-time pairing goes through [`generate_psk`] instead.
    #[instrument(skip(key))]
    pub fn connect(host: &str, identity: &str, key: &str) -> Result<Session> {
        debug!("Opening DTLS session to {}:{}", host, GATEWAY_PORT);
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect((host, GATEWAY_PORT))?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut builder = SslContext::builder(SslMethod::dtls())?;
        builder.set_cipher_list(PSK_CIPHER)?;
        let identity = identity.as_bytes().to_vec();
        let key = key.as_bytes().to_vec();
        builder.set_psk_client_callback(move |_, _, identity_buf, psk_buf| {
            // The identity buffer wants a NUL-terminated C string.
            if identity.len() + 1 > identity_buf.len() || key.len() > psk_buf.len() {
                return Ok(0);
            }
            identity_buf[..identity.len()].copy_from_slice(&identity);
            identity_buf[identity.len()] = 0;
            psk_buf[..key.len()].copy_from_slice(&key);
            Ok(key.len())
        });

        let ssl = Ssl::new(&builder.build())?;
        let stream = ssl
            .connect(UdpChannel(socket))
            .map_err(|err| Error::Handshake(err.to_string()))?;
        info!("DTLS session established with {}", host);

        // Seed the message id from the clock so ids differ across runs.
        let message_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.subsec_millis() as u16)
            .unwrap_or(0);

        Ok(Session { stream, message_id })
    }

    fn next_message_id(&mut self) -> u16 {
        self.message_id = self.message_id.wrapping_add(1);
        self.message_id
    }

    /// Empty ACK for a separate (non-piggybacked) confirmable response.
    fn acknowledge(&mut self, response: &Packet) -> Result<()> {
        let mut ack = Packet::new();
        ack.header.set_type(MessageType::Acknowledgement);
        ack.header.code = MessageClass::Empty;
        ack.header.message_id = response.header.message_id;
        let bytes = ack.to_bytes()?;
        self.stream.write_all(&bytes)?;
        Ok(())
    }
}

impl Api for Session {
    /// Sends one confirmable request and blocks until the matching response
    /// arrives.
    ///
    /// The gateway usually piggybacks the response on the ACK; when it sends
    /// an empty ACK followed by a separate confirmable response, that
    /// response is acknowledged and returned instead.
    fn request(&mut self, method: Method, path: &str, payload: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let message_id = self.next_message_id();
        let token = message_id.to_be_bytes().to_vec();

        let mut request: CoapRequest<SocketAddr> = CoapRequest::new();
        request.set_method(match method {
            Method::Get => RequestType::Get,
            Method::Put => RequestType::Put,
            Method::Post => RequestType::Post,
        });
        request.set_path(path);
        request.message.header.set_type(MessageType::Confirmable);
        request.message.header.message_id = message_id;
        request.message.set_token(token.clone());
        if let Some(body) = payload {
            request.message.set_content_format(ContentFormat::ApplicationJSON);
            request.message.payload = body;
        }

        trace!("{:?} {}", method, path);
        let bytes = request.message.to_bytes()?;
        self.stream.write_all(&bytes)?;

        let mut buf = [0u8; 2048];
        for _ in 0..4 {
            let read = self.stream.read(&mut buf)?;
            let packet = Packet::from_bytes(&buf[..read])?;
            match packet.header.code {
                // Empty ACK: the real response follows separately.
                MessageClass::Empty => continue,
                MessageClass::Response(status) => {
                    if packet.get_token().to_vec() != token {
                        continue;
                    }
                    if packet.header.get_type() == MessageType::Confirmable {
                        self.acknowledge(&packet)?;
                    }
                    return match status {
                        ResponseType::Content
                        | ResponseType::Created
                        | ResponseType::Changed
                        | ResponseType::Valid
                        | ResponseType::Deleted => Ok(packet.payload),
                        other => Err(Error::ErrorResponse {
                            code: format!("{other:?}"),
                            path: path.to_string(),
                        }),
                    };
                }
                _ => continue,
            }
        }
        Err(Error::UnexpectedResponse)
    }
}

#[derive(Deserialize)]
struct KeyExchange {
    #[serde(rename = "9091")]
    psk: Option<String>,
}

/// One-time pairing: exchanges the 16-character security code printed on
/// the gateway for a durable pre-shared key bound to `identity`.
///
/// The exchange runs over a session authenticated as the well-known
/// pairing identity with the security code as its key. The returned PSK is
/// what all later sessions authenticate with; persist it, the exchange
/// cannot be repeated for the same identity.
#[instrument(skip(security_code))]
pub fn generate_psk(host: &str, security_code: &str, identity: &str) -> Result<String> {
    info!("Exchanging security code for a pre-shared key");
    let mut session = Session::connect(host, PAIRING_IDENTITY, security_code)?;
    let payload = serde_json::to_vec(&serde_json::json!({ "9090": identity }))?;
    let response = session.request(Method::Post, KEY_EXCHANGE_PATH, Some(payload))?;
    let exchange: KeyExchange = serde_json::from_slice(&response)?;
    exchange.psk.ok_or(Error::KeyExchangeFailed)
}
