//! High-level XML-RPC client for the dedicated server

use crate::codec::{self, MethodResponse};
use crate::error::RpcError;
use crate::transport::{ProtocolVersion, RpcTransport, TransportConfig, TransportState};
use crate::value::Value;
use log::{debug, warn};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};

pub struct RpcClient<S = TcpStream> {
    transport: RpcTransport<S>,
}

impl RpcClient<TcpStream> {
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        config: TransportConfig,
    ) -> Result<Self, RpcError> {
        let transport = RpcTransport::connect(addr, config).await?;
        Ok(Self { transport })
    }
}

impl<S> RpcClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a stream that has not seen the handshake yet
    pub async fn from_stream(stream: S, config: TransportConfig) -> Result<Self, RpcError> {
        let transport = RpcTransport::handshake(stream, config).await?;
        Ok(Self { transport })
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.transport.protocol()
    }

    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    /// Calls `method` and returns the first value of the response.
    ///
    /// A server fault comes back as [`RpcError::Fault`] with the method name
    /// attached; the connection stays usable.
    pub async fn call(&mut self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        let request = codec::encode_call(method, params)?;
        debug!("Calling {} with {} params", method, params.len());

        let payload = self.transport.request(request.as_bytes()).await?;
        let xml = String::from_utf8_lossy(&payload);

        match codec::decode_response(&xml)? {
            MethodResponse::Params(value) => Ok(value),
            MethodResponse::Fault(fault) => Err(fault.with_method(method).into()),
        }
    }

    /// Decodes the callbacks queued so far without touching the socket.
    ///
    /// Each one is returned as `[method, [params...]]`. A callback that does
    /// not decode is logged at `warn` and skipped; the rest are still returned.
    pub fn poll_callbacks(&mut self) -> Vec<Value> {
        self.transport
            .take_callbacks()
            .into_iter()
            .filter_map(|payload| {
                match codec::decode_call(&String::from_utf8_lossy(&payload)) {
                    Ok(call) => {
                        debug!("Callback {}", call.method);
                        Some(call.into_value())
                    }
                    Err(e) => {
                        warn!("Dropping undecodable callback ({} bytes): {}", payload.len(), e);
                        None
                    }
                }
            })
            .collect()
    }

    /// Reads callback frames from the socket for up to `wait`, then drains
    /// the queue like [`RpcClient::poll_callbacks`].
    pub async fn wait_callbacks(&mut self, wait: Duration) -> Result<Vec<Value>, RpcError> {
        self.transport.receive_pending(wait).await?;
        Ok(self.poll_callbacks())
    }

    pub async fn authenticate(&mut self, login: &str, password: &str) -> Result<bool, RpcError> {
        let result = self
            .call("Authenticate", &[Value::from(login), Value::from(password)])
            .await?;
        Ok(expect_bool("Authenticate", &result))
    }

    pub async fn enable_callbacks(&mut self, enable: bool) -> Result<bool, RpcError> {
        let result = self
            .call("EnableCallbacks", &[Value::from(enable)])
            .await?;
        Ok(expect_bool("EnableCallbacks", &result))
    }

    pub async fn close(&mut self) -> Result<(), RpcError> {
        self.transport.close().await?;
        Ok(())
    }
}

fn expect_bool(method: &str, result: &Value) -> bool {
    result.as_bool().unwrap_or_else(|| {
        warn!("{} returned {} instead of boolean", method, result.type_name());
        false
    })
}
