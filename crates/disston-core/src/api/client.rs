//! Typed endpoint functions for the club API.
//!
//! Each method is a single transport call: no retry, no caching. Reads are
//! retried and cached by the query runner, mutations are never retried.

use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ApiError, ApiRequest, HttpTransport, Transport};
use crate::config::ClientConfig;
use crate::models::{BlogPost, BlogPostList, League, LeagueStanding, LeagueType, Match, Player};

/// Default `limit` of the upcoming/recent match listings.
pub const DEFAULT_MATCH_LIMIT: u32 = 10;

/// Club API client.
/// Clone is cheap - the transport is shared behind an Arc.
#[derive(Clone)]
pub struct ClubApi {
    transport: Arc<dyn Transport>,
}

impl ClubApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Client on the reqwest transport for `config.base_url`.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new(config)?)))
    }

    async fn get<T: DeserializeOwned>(&self, request: ApiRequest, cancel: CancellationToken) -> Result<T, ApiError> {
        let path = request.path();
        let response = self.transport.send(request, cancel).await?;
        debug!(path = %path, status = response.status(), bytes = response.body().len(), "Fetched");
        response.json()
    }

    /// Mutation endpoints answer with an empty or irrelevant body.
    async fn execute(&self, request: ApiRequest, cancel: CancellationToken) -> Result<(), ApiError> {
        self.transport.send(request, cancel).await.map(|_| ())
    }

    // ===== Players =====

    pub async fn active_players(&self, cancel: CancellationToken) -> Result<Vec<Player>, ApiError> {
        self.get(ApiRequest::get(["players", "active-players"]), cancel).await
    }

    pub async fn roster(&self, cancel: CancellationToken) -> Result<Vec<Player>, ApiError> {
        self.get(ApiRequest::get(["players", "roster"]), cancel).await
    }

    /// Pending join requests.
    pub async fn player_requests(&self, cancel: CancellationToken) -> Result<Vec<Player>, ApiError> {
        self.get(ApiRequest::get(["players", "requests"]), cancel).await
    }

    pub async fn approve_player(&self, id: &str, cancel: CancellationToken) -> Result<(), ApiError> {
        self.execute(ApiRequest::put(["players", id, "approve"]), cancel).await
    }

    pub async fn reject_player(&self, id: &str, cancel: CancellationToken) -> Result<(), ApiError> {
        self.execute(ApiRequest::delete(["players", id, "reject"]), cancel).await
    }

    // ===== Blog posts =====

    /// A response without `posts` reads as no posts.
    pub async fn blog_posts(&self, cancel: CancellationToken) -> Result<Vec<BlogPost>, ApiError> {
        let list: Option<BlogPostList> = self.get(ApiRequest::get(["blog-posts"]), cancel).await?;
        Ok(list.map(BlogPostList::into_posts).unwrap_or_default())
    }

    /// `PUT /blog-posts/{id}/edit` with the changed fields.
    pub async fn edit_blog_post(&self, id: &str, body: Value, cancel: CancellationToken) -> Result<(), ApiError> {
        self.execute(ApiRequest::put(["blog-posts", id, "edit"]).json(body), cancel).await
    }

    pub async fn delete_blog_post(&self, id: &str, cancel: CancellationToken) -> Result<(), ApiError> {
        self.execute(ApiRequest::delete(["blog-posts", id]), cancel).await
    }

    // ===== Leagues =====

    pub async fn leagues(&self, cancel: CancellationToken) -> Result<Vec<League>, ApiError> {
        self.get(ApiRequest::get(["api", "leagues", ""]), cancel).await
    }

    pub async fn leagues_by_type(&self, league_type: LeagueType, cancel: CancellationToken) -> Result<Vec<League>, ApiError> {
        let leagues = self.leagues(cancel).await?;
        Ok(leagues.into_iter().filter(|l| l.league_type == league_type).collect())
    }

    pub async fn active_leagues(&self, cancel: CancellationToken) -> Result<Vec<League>, ApiError> {
        let leagues = self.leagues(cancel).await?;
        Ok(leagues.into_iter().filter(League::is_active).collect())
    }

    pub async fn league_standings(&self, league_id: &str, cancel: CancellationToken) -> Result<Vec<LeagueStanding>, ApiError> {
        self.get(ApiRequest::get(["api", "standings", "league", league_id]), cancel).await
    }

    // ===== Matches =====

    pub async fn matches(&self, cancel: CancellationToken) -> Result<Vec<Match>, ApiError> {
        self.get(ApiRequest::get(["api", "matches", ""]), cancel).await
    }

    pub async fn upcoming_matches(&self, limit: u32, cancel: CancellationToken) -> Result<Vec<Match>, ApiError> {
        self.get(ApiRequest::get(["api", "matches", "upcoming"]).query("limit", limit), cancel)
            .await
    }

    pub async fn recent_matches(&self, limit: u32, cancel: CancellationToken) -> Result<Vec<Match>, ApiError> {
        self.get(ApiRequest::get(["api", "matches", "recent"]).query("limit", limit), cancel)
            .await
    }

    pub async fn matches_by_league(&self, league_id: &str, cancel: CancellationToken) -> Result<Vec<Match>, ApiError> {
        self.get(ApiRequest::get(["api", "matches", "league", league_id]), cancel).await
    }

    pub async fn matches_by_team(&self, team_id: &str, cancel: CancellationToken) -> Result<Vec<Match>, ApiError> {
        self.get(ApiRequest::get(["api", "matches", "team", team_id]), cancel).await
    }

    pub async fn match_detail(&self, match_id: &str, cancel: CancellationToken) -> Result<Match, ApiError> {
        self.get(ApiRequest::get(["api", "matches", match_id]), cancel).await
    }
}
