//! Inbound `mining.*` requests understood by the pool.
use super::connection::{ClientConnection, MinerIdentity, CALL_TIMEOUT};
use super::message::ReplyError;
use crate::error::StratumErrors;
use crate::EXTRANONCE2_SIZE;
use serde_json::{json, Value};

/// Subscription ids announced in the `mining.subscribe` reply. Resuming a
/// session by id is not supported so they are placeholders.
pub const SET_DIFFICULTY_SUBSCRIPTION_ID: &str = "5d1f0c2a9e4b7a68";
pub const NOTIFY_SUBSCRIPTION_ID: &str = "a3c97be10f4d2e55";

/// Fetches `params[index]` as a string.
pub fn string_param<'a>(
    params: &'a [Value],
    index: usize,
    param: &str,
    method: &str,
) -> Result<&'a str, StratumErrors> {
    let value = params
        .get(index)
        .ok_or_else(|| StratumErrors::ParamNotFound {
            param: param.to_string(),
            method: method.to_string(),
        })?;
    value
        .as_str()
        .ok_or_else(|| StratumErrors::InvalidMethodParams {
            method: method.to_string(),
        })
}

impl ClientConnection {
    /// Handles `mining.subscribe`.
    ///
    /// The optional first parameter is the miner software version. Replies with
    /// ```json
    /// [[["mining.set_difficulty", "<id>"], ["mining.notify", "<id>"]], "<extranonce1 hex>", 4]
    /// ```
    pub(crate) async fn handle_subscribe(&self, id: u64, params: &[Value]) {
        if let Some(version) = params.first().and_then(Value::as_str) {
            self.set_miner_version(version.to_string()).await;
        }
        log::info!(
            "Subscribing {} ({:?}) with extranonce1 {}",
            self.peer_addr(),
            params.first(),
            self.extranonce1_hex()
        );
        let result = json!([
            [
                ["mining.set_difficulty", SET_DIFFICULTY_SUBSCRIPTION_ID],
                ["mining.notify", NOTIFY_SUBSCRIPTION_ID]
            ],
            self.extranonce1_hex(),
            EXTRANONCE2_SIZE
        ]);
        if let Err(error) = self.reply(id, Ok(result)).await {
            log::error!("Subscribe reply to {} failed: {}", self.peer_addr(), error);
        }
    }

    /// Handles `mining.authorize`.
    ///
    /// The first parameter is `payout_address[.worker]`; anything after it
    /// (usually a password) is ignored. A missing or non-string address is
    /// answered with an error and ends the session. On success the miner gets
    /// `true` followed by the pool difficulty.
    pub(crate) async fn handle_authorize(&self, id: u64, params: &[Value]) {
        let user = match string_param(params, 0, "payout_address", "mining.authorize") {
            Ok(user) => user,
            Err(error) => {
                log::error!("Rejecting authorization from {}: {}", self.peer_addr(), error);
                let message = match error {
                    StratumErrors::ParamNotFound { .. } => "Mining address required",
                    _ => "Invalid mining address",
                };
                self.send_error_and_close(id, message).await;
                return;
            }
        };
        // TODO: validate the payout address against the chain's address format.
        let identity = MinerIdentity::parse(user);
        log::info!(
            "Authorized {} as {} (worker {:?})",
            self.peer_addr(),
            identity.payout_address,
            identity.worker
        );
        self.set_identity(identity).await;

        if self.reply(id, Ok(json!(true))).await.is_err() {
            return;
        }
        match self.server() {
            Some(server) => {
                let difficulty = server.difficulty().await;
                if let Err(error) = self.send_difficulty(difficulty).await {
                    log::error!("Sending difficulty to {} failed: {}", self.peer_addr(), error);
                }
            }
            None => log::debug!("Server is gone, not sending difficulty to {}", self.peer_addr()),
        }
    }

    /// Sends the error reply, gives the miner up to [`CALL_TIMEOUT`] to take
    /// it, then ends the session.
    async fn send_error_and_close(&self, id: u64, message: &str) {
        let error = ReplyError::new(ReplyError::UNAUTHORIZED_WORKER, message);
        if self.reply(id, Err(error)).await.is_ok()
            && tokio::time::timeout(CALL_TIMEOUT, self.flush()).await.is_err()
        {
            log::debug!("Error reply to {} not flushed in time", self.peer_addr());
        }
        self.close().await;
    }

    /// Pushes `mining.set_difficulty` to the miner.
    pub async fn send_difficulty(&self, difficulty: f64) -> Result<(), StratumErrors> {
        self.notify("mining.set_difficulty", vec![json!(difficulty)])
            .await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn string_param_extraction() {
        let params = vec![json!("addr.rig"), json!(5)];
        assert_eq!(string_param(&params, 0, "user", "m").unwrap(), "addr.rig");
        assert!(matches!(
            string_param(&params, 1, "pass", "m"),
            Err(StratumErrors::InvalidMethodParams { .. })
        ));
        assert!(matches!(
            string_param(&params, 2, "other", "m"),
            Err(StratumErrors::ParamNotFound { .. })
        ));
    }

    #[test]
    fn miner_identity_splits_worker() {
        assert_eq!(
            MinerIdentity::parse("addr.rig1"),
            MinerIdentity {
                payout_address: "addr".to_string(),
                worker: Some("rig1".to_string())
            }
        );
        assert_eq!(MinerIdentity::parse("addr").worker, None);
    }
}
