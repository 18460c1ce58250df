//! RPC boundary.
//!
//! [`Transport`] is what the consensus core calls to reach a peer;
//! [`RequestHandler`] is what a transport calls when a peer reaches us.
//! Between them sit the frame codec and the [`RpcService`] dispatcher.

mod codec;
mod local;
mod rpc_service;
mod tcp;
pub use codec::*;
pub use local::*;
pub use rpc_service::*;
pub use tcp::*;


use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::AppendEntryRequest;
use crate::AppendEntryResponse;
use crate::GetEntriesRequest;
use crate::GetEntriesResponse;
use crate::HeartBeatRequest;
use crate::HeartBeatResponse;
use crate::LedgerRequest;
use crate::LedgerResponse;
use crate::MetadataRequest;
use crate::MetadataResponse;
use crate::NetworkError;
use crate::PullEntriesRequest;
use crate::PullEntriesResponse;
use crate::PushEntryRequest;
use crate::PushEntryResponse;
use crate::ResponseCode;
use crate::Result;
use crate::VoteRequest;
use crate::VoteResponse;

/// Outbound calls to the peer named by each request's `remote_id`.
///
/// Calls never fail: an unreachable peer or an expired deadline comes back
/// as a response with [`ResponseCode::NetworkError`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn heart_beat(
        &self,
        request: HeartBeatRequest,
    ) -> HeartBeatResponse;

    async fn vote(
        &self,
        request: VoteRequest,
    ) -> VoteResponse;

    async fn append(
        &self,
        request: AppendEntryRequest,
    ) -> AppendEntryResponse;

    async fn get(
        &self,
        request: GetEntriesRequest,
    ) -> GetEntriesResponse;

    async fn metadata(
        &self,
        request: MetadataRequest,
    ) -> MetadataResponse;

    async fn pull(
        &self,
        request: PullEntriesRequest,
    ) -> PullEntriesResponse;

    async fn push(
        &self,
        request: PushEntryRequest,
    ) -> PushEntryResponse;
}

/// Inbound side: one handler per request kind.
///
/// An `Err` means the node could not answer at all (a fatal condition or a
/// node that is shutting down); rejections are regular responses.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle_heart_beat(
        &self,
        request: HeartBeatRequest,
    ) -> Result<HeartBeatResponse>;

    async fn handle_vote(
        &self,
        request: VoteRequest,
    ) -> Result<VoteResponse>;

    async fn handle_append(
        &self,
        request: AppendEntryRequest,
    ) -> Result<AppendEntryResponse>;

    async fn handle_get(
        &self,
        request: GetEntriesRequest,
    ) -> Result<GetEntriesResponse>;

    async fn handle_metadata(
        &self,
        request: MetadataRequest,
    ) -> Result<MetadataResponse>;

    async fn handle_pull(
        &self,
        request: PullEntriesRequest,
    ) -> Result<PullEntriesResponse>;

    async fn handle_push(
        &self,
        request: PushEntryRequest,
    ) -> Result<PushEntryResponse>;
}

/// Carries one request frame to a peer and returns its response frame.
#[async_trait]
pub trait FrameChannel: Send + Sync + 'static {
    async fn invoke(
        &self,
        remote_id: &str,
        request: RemotingCommand,
    ) -> Result<RemotingCommand>;
}

/// Encodes `request`, sends it over `channel` and decodes the reply. Any
/// failure on the way folds into a `NETWORK_ERROR` response.
pub(crate) async fn call<C, R>(
    channel: &C,
    request: R,
) -> R::Response
where
    C: FrameChannel + ?Sized,
    R: LedgerRequest,
{
    match try_call(channel, &request).await {
        Ok(response) => response,
        Err(e) => {
            debug!(
                "{} request to {} failed: {}",
                R::CODE.as_str(),
                request.remote_id(),
                e
            );
            R::Response::with_code(ResponseCode::NetworkError)
        }
    }
}

async fn try_call<C, R>(
    channel: &C,
    request: &R,
) -> Result<R::Response>
where
    C: FrameChannel + ?Sized,
    R: LedgerRequest,
{
    let frame = RemotingCommand::request(R::CODE, encode_body(request)?);
    let response = channel.invoke(request.remote_id(), frame).await?;
    if !response.response || response.code != R::CODE {
        return Err(NetworkError::UnexpectedFrame(format!(
            "expected {} response, got {:?} (response={})",
            R::CODE.as_str(),
            response.code,
            response.response
        ))
        .into());
    }
    decode_body(&response.body)
}
