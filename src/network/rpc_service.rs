use std::sync::Arc;

use tracing::error;
use tracing::warn;

use super::decode_body;
use super::encode_body;
use super::RemotingCommand;
use super::RequestHandler;
use crate::utils::worker_pool::WorkerPool;
use crate::RequestCode;
use crate::Result;

/// Maps request frames to the node's [`RequestHandler`].
///
/// Decoding, handling and encoding of each request run as one task on the
/// node's [`WorkerPool`], so transports never wait on consensus work.
pub struct RpcService {
    handler: Arc<dyn RequestHandler>,
    pool: Arc<WorkerPool>,
}

impl RpcService {
    pub fn new(
        handler: Arc<dyn RequestHandler>,
        pool: Arc<WorkerPool>,
    ) -> Arc<Self> {
        Arc::new(Self { handler, pool })
    }

    /// Processes `request` on the worker pool and hands the outcome to
    /// `reply`. If the pool is shut down, `reply` is dropped unanswered.
    pub fn spawn_request<F>(
        self: &Arc<Self>,
        request: RemotingCommand,
        reply: F,
    ) where
        F: FnOnce(Result<RemotingCommand>) + Send + 'static,
    {
        let this = self.clone();
        let accepted = self.pool.spawn(async move {
            let result = this.process_request(&request).await;
            if let Err(e) = &result {
                error!(
                    "Process {} request failed, opaque={}: {}",
                    request.code.as_str(),
                    request.opaque,
                    e
                );
            }
            reply(result);
        });
        if !accepted {
            warn!("worker pool closed, dropping inbound request");
        }
    }

    pub async fn process_request(
        &self,
        request: &RemotingCommand,
    ) -> Result<RemotingCommand> {
        let body = match request.code {
            RequestCode::HeartBeat => {
                let response = self
                    .handler
                    .handle_heart_beat(decode_body(&request.body)?)
                    .await?;
                encode_body(&response)?
            }
            RequestCode::Vote => {
                let response = self.handler.handle_vote(decode_body(&request.body)?).await?;
                encode_body(&response)?
            }
            RequestCode::Append => {
                let response = self
                    .handler
                    .handle_append(decode_body(&request.body)?)
                    .await?;
                encode_body(&response)?
            }
            RequestCode::Get => {
                let response = self.handler.handle_get(decode_body(&request.body)?).await?;
                encode_body(&response)?
            }
            RequestCode::Metadata => {
                let response = self
                    .handler
                    .handle_metadata(decode_body(&request.body)?)
                    .await?;
                encode_body(&response)?
            }
            RequestCode::Pull => {
                let response = self.handler.handle_pull(decode_body(&request.body)?).await?;
                encode_body(&response)?
            }
            RequestCode::Push => {
                let response = self.handler.handle_push(decode_body(&request.body)?).await?;
                encode_body(&response)?
            }
        };
        Ok(request.response_to(body))
    }
}
