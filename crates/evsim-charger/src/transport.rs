//! WebSocket transport glue.
//!
//! The charger sees the transport as a pair of opaque halves: a write half
//! used for `send_text`/`close` (kept behind a mutex so frames are written
//! atomically) and a read half owned exclusively by the receive loop.

use crate::error::ChargerError;
use evsim_ocpp::OcppVersion;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::debug;

pub(crate) type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
pub(crate) type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Dial the Central System and perform the WebSocket handshake, requesting
/// the dialect's OCPP sub-protocol.
pub(crate) async fn connect(
    url: &str,
    version: OcppVersion,
    tls: Option<native_tls::TlsConnector>,
) -> Result<(WsSink, WsStream), ChargerError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ChargerError::Transport(format!("invalid server url: {e}")))?;
    request.headers_mut().insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(version.subprotocol()),
    );

    let connector = tls.map(Connector::NativeTls);
    let (stream, response) = connect_async_tls_with_config(request, None, false, connector)
        .await
        .map_err(ChargerError::from)?;

    debug!(status = %response.status(), "websocket handshake complete");
    Ok(stream.split())
}
