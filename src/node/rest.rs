//! REST operations of a node.
//!
//! All operations except [`Node::fetch_stats`] are scoped to the session
//! announced in the `ready` frame and fail with `FailedPrecondition` until it
//! arrived. Each request counts towards [`Node::calls`], whatever its outcome.

use std::sync::atomic::Ordering;

use reqwest::Method;
use serde_json::Value;
use tokio::sync::oneshot;

use super::Node;
use crate::{
    error::{Error, Result},
    http::RestRequest,
    player,
    protocol::{
        messages::Outbound,
        rest::{FreeAddress, PlayerOptions, PlayerResponse, RoutePlannerStatus, SessionUpdate},
        Stats,
    },
};

impl Node {
    /// Lists the players of the session.
    ///
    /// Returns an empty list if the node does not respond with an array.
    pub async fn get_players(&self) -> Result<Vec<PlayerResponse>> {
        let session_id = self.require_session()?;
        let request = self.request(Method::GET, &format!("sessions/{session_id}/players"));

        let players: Value = self.make_request(request).await?.json().await?;
        if !players.is_array() {
            return Ok(Vec::new());
        }

        serde_json::from_value(players).map_err(Into::into)
    }

    /// Gets one player of the session.
    pub async fn get_player(&self, guild_id: &str) -> Result<PlayerResponse> {
        let session_id = self.require_session()?;
        let request = self.request(
            Method::GET,
            &format!("sessions/{session_id}/players/{guild_id}"),
        );

        self.make_request(request).await?.json().await.map_err(Into::into)
    }

    /// Updates a player on the node.
    ///
    /// With `no_replace`, a track in `options` does not replace one that is
    /// already playing. On success the voice state, volume, pause state and
    /// filters from the response are copied onto the local player.
    pub async fn update_player(
        &self,
        guild_id: &str,
        options: &PlayerOptions,
        no_replace: bool,
    ) -> Result<PlayerResponse> {
        let session_id = self.require_session()?;
        let mut request = self
            .request(
                Method::PATCH,
                &format!("sessions/{session_id}/players/{guild_id}"),
            )
            .with_json(options)?;
        if no_replace {
            request = request.with_query("noReplace", true);
        }

        let response: PlayerResponse = self.make_request(request).await?.json().await?;

        if let Some(player) = self.manager.upgrade().and_then(|manager| manager.player(guild_id)) {
            let mut player = player::lock(&player);
            player.voice = Some(response.voice.clone());
            player.volume = response.volume;
            player.paused = response.paused;
            player.filters = response.filters.clone();
            if options.filters.is_some() {
                player.mark_filters_updated();
            }
        }

        Ok(response)
    }

    /// Destroys a player on the node.
    ///
    /// Before the session is known, falls back to the deprecated `destroy`
    /// operation on the websocket.
    pub async fn destroy_player(&self, guild_id: &str) -> Result<()> {
        let Some(session_id) = self.session_id() else {
            if let Some(done) = self.destroy_player_over_socket(guild_id)? {
                // The socket may close before the frame is written.
                done.await.unwrap_or(Ok(()))?;
            }
            return Ok(());
        };

        let request = self.request(
            Method::DELETE,
            &format!("sessions/{session_id}/players/{guild_id}"),
        );
        self.make_request(request).await?;

        Ok(())
    }

    /// Queues the deprecated `destroy` operation on the websocket.
    ///
    /// Returns `Ok(None)` if the node is not connected.
    pub(crate) fn destroy_player_over_socket(
        &self,
        guild_id: &str,
    ) -> Result<Option<oneshot::Receiver<Result<()>>>> {
        warn!(
            "node {} has no session yet, destroying player {guild_id} over the websocket",
            self.identifier()
        );
        self.enqueue(&Outbound::Destroy {
            guild_id: guild_id.to_owned(),
        })
    }

    /// Configures resuming of the session.
    pub async fn update_session(
        &self,
        resuming_key: Option<String>,
        timeout: u64,
    ) -> Result<SessionUpdate> {
        let session_id = self.require_session()?;
        let request = self
            .request(Method::PATCH, &format!("sessions/{session_id}"))
            .with_json(&SessionUpdate {
                resuming_key,
                timeout,
            })?;

        self.make_request(request).await?.json().await.map_err(Into::into)
    }

    /// Fetches the statistics of the node.
    pub async fn fetch_stats(&self) -> Result<Stats> {
        let request = self.request(Method::GET, "stats");
        self.make_request(request).await?.json().await.map_err(Into::into)
    }

    /// Gets the status of the route planner.
    pub async fn route_planner_status(&self) -> Result<RoutePlannerStatus> {
        self.require_session()?;
        let request = self.request(Method::GET, "routeplanner/status");
        self.make_request(request).await?.json().await.map_err(Into::into)
    }

    /// Returns a failing address to the pool of the route planner.
    pub async fn unmark_failed_address(&self, address: &str) -> Result<()> {
        self.require_session()?;
        let request = self
            .request(Method::POST, "routeplanner/free/address")
            .with_json(&FreeAddress {
                address: address.to_owned(),
            })?;
        self.make_request(request).await?;

        Ok(())
    }

    fn request(&self, method: Method, endpoint: &str) -> RestRequest {
        RestRequest::new(
            method,
            self.options.version_path(),
            endpoint,
            &self.options.password,
            self.options.request_timeout,
        )
    }

    async fn make_request(&self, request: RestRequest) -> Result<reqwest::Response> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.http.execute(request).await
    }

    fn require_session(&self) -> Result<String> {
        self.session_id().ok_or_else(|| {
            Error::failed_precondition(format!(
                "node {} has no session yet",
                self.identifier()
            ))
        })
    }
}
