use anyhow::anyhow;
use bytes::BytesMut;
use kafka_protocol::messages::{ApiKey, RequestHeader, RequestKind, ResponseHeader, ResponseKind};
use kafka_protocol::protocol::{Decodable, Encodable, StrBytes};
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::MAX_FRAME_SIZE;

/// One framed request/response channel to a broker.
///
/// Frames are an i32 size prefix followed by header and body. Exactly one
/// round-trip may be in flight at a time; the owner serializes access.
pub(crate) struct BrokerChannel {
    stream: TcpStream,
    client_id: StrBytes,
    correlation_id: i32,
    frame_buffer: BytesMut,
    read_buffer: BytesMut,
    /// Cleared when a round-trip is abandoned mid-flight (client-side
    /// timeout); the stream may hold a stale response after that.
    healthy: bool,
}

impl BrokerChannel {
    pub(crate) async fn connect(address: &str, client_id: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(address).await?;
        debug!("connected to broker at {}", address);
        Ok(Self {
            stream,
            client_id: StrBytes::from_string(client_id.to_string()),
            correlation_id: 0,
            frame_buffer: BytesMut::with_capacity(4096),
            read_buffer: BytesMut::with_capacity(4096),
            healthy: true,
        })
    }

    /// Send one request and read its response.
    pub(crate) async fn call(
        &mut self,
        api_key: ApiKey,
        api_version: i16,
        request: &RequestKind,
    ) -> anyhow::Result<ResponseKind> {
        if !self.healthy {
            return Err(anyhow!("broker channel abandoned mid-flight, reconnect required"));
        }

        self.correlation_id = self.correlation_id.wrapping_add(1);
        let header = RequestHeader::default()
            .with_request_api_key(api_key as i16)
            .with_request_api_version(api_version)
            .with_correlation_id(self.correlation_id)
            .with_client_id(Some(self.client_id.clone()));

        self.frame_buffer.clear();
        let header_version = api_key.request_header_version(api_version);
        header.encode(&mut self.frame_buffer, header_version)?;
        request.encode(&mut self.frame_buffer, api_version)?;

        debug!(
            "sending {:?} v{} correlation_id={} ({} bytes)",
            api_key,
            api_version,
            self.correlation_id,
            self.frame_buffer.len()
        );

        self.healthy = false;
        self.stream.write_i32(self.frame_buffer.len() as i32).await?;
        self.stream.write_all(&self.frame_buffer).await?;
        self.stream.flush().await?;

        let frame_size = self.stream.read_i32().await?;
        if frame_size <= 0 || frame_size > MAX_FRAME_SIZE {
            return Err(anyhow!("invalid response frame size: {}", frame_size));
        }
        let frame_size = frame_size as usize;

        if frame_size > self.read_buffer.len() {
            self.read_buffer.resize(frame_size, 0);
        }
        self.stream.read_exact(&mut self.read_buffer[..frame_size]).await?;
        let mut frame = self.read_buffer.split_to(frame_size).freeze();
        self.healthy = true;

        let response_header_version = api_key.response_header_version(api_version);
        let response_header = ResponseHeader::decode(&mut frame, response_header_version)?;
        if response_header.correlation_id != self.correlation_id {
            self.healthy = false;
            return Err(anyhow!(
                "correlation id mismatch: expected {}, got {}",
                self.correlation_id,
                response_header.correlation_id
            ));
        }

        let response = ResponseKind::decode(api_key, &mut frame, api_version)?;
        Ok(response)
    }

    /// False once a round-trip was abandoned mid-flight; the socket can no
    /// longer be trusted to frame-align and must be replaced.
    pub(crate) fn is_healthy(&self) -> bool {
        self.healthy
    }

    pub(crate) async fn shutdown(&mut self) {
        self.healthy = false;
        let _ = self.stream.shutdown().await;
    }
}
