//! Ring-mode transport.
//!
//! When the alertmanager fleet is discovered through the ring, the
//! discovered addresses are gRPC endpoints. The outbound HTTP request
//! is re-encoded as a carried message preserving method, URL, headers
//! and body, and issued as a unary call against the member.

use crate::error::{NotifyError, Result};
use crate::OutboundRequest;

#[derive(Clone, PartialEq, prost::Message)]
pub struct HttpHeaderPb {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, repeated, tag = "2")]
    pub values: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HttpRequestPb {
    #[prost(string, tag = "1")]
    pub method: String,
    #[prost(string, tag = "2")]
    pub url: String,
    #[prost(message, repeated, tag = "3")]
    pub headers: Vec<HttpHeaderPb>,
    #[prost(bytes = "vec", tag = "4")]
    pub body: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HttpResponsePb {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(message, repeated, tag = "2")]
    pub headers: Vec<HttpHeaderPb>,
    #[prost(bytes = "vec", tag = "3")]
    pub body: Vec<u8>,
}

/// Re-encodes an outbound notification request as a carried message.
/// Alert pushes are always POSTs.
pub fn encode_request(request: &OutboundRequest) -> HttpRequestPb {
    let mut headers = Vec::with_capacity(request.headers.keys_len());
    for name in request.headers.keys() {
        let values = request
            .headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect();
        headers.push(HttpHeaderPb {
            name: name.as_str().to_string(),
            values,
        });
    }
    HttpRequestPb {
        method: "POST".to_string(),
        url: request.url.to_string(),
        headers,
        body: request.body.clone(),
    }
}

/// A raw unary client against a discovered ring member.
pub struct CarrierClient {
    grpc: tonic::client::Grpc<tonic::transport::Channel>,
}

impl CarrierClient {
    /// Connects to the gRPC endpoint of a member given its host:port
    /// authority.
    pub async fn connect(authority: &str) -> Result<Self> {
        let endpoint = tonic::transport::Endpoint::from_shared(format!("http://{authority}"))?;
        let channel = endpoint.connect().await?;
        Ok(Self {
            grpc: tonic::client::Grpc::new(channel),
        })
    }

    /// Issues the carried request and returns the carried response.
    pub async fn handle(&mut self, request: HttpRequestPb) -> Result<HttpResponsePb> {
        self.grpc.ready().await?;
        let codec: tonic::codec::ProstCodec<HttpRequestPb, HttpResponsePb> =
            tonic::codec::ProstCodec::default();
        let path = http::uri::PathAndQuery::from_static("/httpcarrier.v1.HttpCarrier/Handle");
        let response = self
            .grpc
            .unary(tonic::Request::new(request), path, codec)
            .await?;
        Ok(response.into_inner())
    }
}

/// Maps a carried response to the delivery result: any 2xx code is a
/// successful push.
pub fn check_response(response: &HttpResponsePb) -> Result<()> {
    if (200..300).contains(&response.code) {
        Ok(())
    } else {
        Err(NotifyError::BadStatus(response.code.max(0) as u16))
    }
}
