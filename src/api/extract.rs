use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::request::Parts,
};
use std::{convert::Infallible, net::SocketAddr};

use crate::utils::client_ip;

/// Client address as seen through proxies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ClientIp(pub(crate) String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // absent when the router is driven without a listener, e.g. in tests
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        Ok(Self(client_ip(&parts.headers, peer)))
    }
}
