//! The club data layer: one query per resource collection plus the admin
//! mutations, all sharing one cache.

use std::future::Future;

use anyhow::Result;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, ClubApi};
use crate::cache::CacheStore;
use crate::config::ClientConfig;
use crate::models::{without_id, BlogPost, League, LeagueStanding, LeagueType, Match, Player};
use crate::mutation::MutationRunner;
use crate::query::{fetcher, Fetcher, QueryHandle, QueryRunner};

/// Query keys, centralized so reads and invalidations agree.
pub mod keys {
    use crate::cache::QueryKey;
    use crate::models::LeagueType;

    pub fn players() -> QueryKey {
        QueryKey::new(["players"])
    }

    pub fn active_players() -> QueryKey {
        players().with("active")
    }

    pub fn roster() -> QueryKey {
        players().with("roster")
    }

    pub fn player_requests() -> QueryKey {
        players().with("requests")
    }

    pub fn blog_posts() -> QueryKey {
        QueryKey::new(["blogPosts"])
    }

    pub fn leagues() -> QueryKey {
        QueryKey::new(["api", "leagues"])
    }

    pub fn leagues_by_type(league_type: LeagueType) -> QueryKey {
        leagues().with("type").with(league_type.as_str())
    }

    pub fn active_leagues() -> QueryKey {
        leagues().with("active")
    }

    pub fn standings(league_id: &str) -> QueryKey {
        QueryKey::new(["api", "standings"]).with(league_id)
    }

    pub fn matches() -> QueryKey {
        QueryKey::new(["api", "matches"])
    }

    pub fn upcoming_matches(limit: u32) -> QueryKey {
        matches().with("upcoming").with(limit)
    }

    pub fn recent_matches(limit: u32) -> QueryKey {
        matches().with("recent").with(limit)
    }

    pub fn matches_by_league(league_id: &str) -> QueryKey {
        matches().with("league").with(league_id)
    }

    pub fn matches_by_team(team_id: &str) -> QueryKey {
        matches().with("team").with(team_id)
    }

    pub fn match_detail(match_id: &str) -> QueryKey {
        matches().with("detail").with(match_id)
    }
}

/// Cached reads and optimistic admin writes against the club API.
/// Clone is cheap; clones share the cache.
#[derive(Clone)]
pub struct Club {
    api: ClubApi,
    queries: QueryRunner,
    mutations: MutationRunner,
}

impl Club {
    pub fn new(api: ClubApi, config: &ClientConfig) -> Self {
        let queries = QueryRunner::new(CacheStore::new(), config.retry_policy(), config.stale_time());
        Self::with_runners(api, queries)
    }

    pub fn with_runners(api: ClubApi, queries: QueryRunner) -> Self {
        let mutations = MutationRunner::new(queries.clone());
        Self {
            api,
            queries,
            mutations,
        }
    }

    /// Club on the HTTP transport described by `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self::new(ClubApi::from_config(config)?, config))
    }

    pub fn api(&self) -> &ClubApi {
        &self.api
    }

    pub fn store(&self) -> &CacheStore {
        self.queries.store()
    }

    pub fn queries(&self) -> &QueryRunner {
        &self.queries
    }

    pub fn mutations(&self) -> &MutationRunner {
        &self.mutations
    }

    fn read<T, F, Fut>(&self, call: F) -> Fetcher<T>
    where
        F: Fn(ClubApi, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let api = self.api.clone();
        fetcher(move |cancel| call(api.clone(), cancel))
    }

    // ===== Players =====

    pub fn active_players(&self) -> QueryHandle<Vec<Player>> {
        let fetch = self.read(|api, cancel| async move { api.active_players(cancel).await });
        self.queries.query(keys::active_players(), fetch)
    }

    pub fn roster(&self) -> QueryHandle<Vec<Player>> {
        let fetch = self.read(|api, cancel| async move { api.roster(cancel).await });
        self.queries.query(keys::roster(), fetch)
    }

    pub fn player_requests(&self) -> QueryHandle<Vec<Player>> {
        let fetch = self.read(|api, cancel| async move { api.player_requests(cancel).await });
        self.queries.query(keys::player_requests(), fetch)
    }

    /// Remove the request from the pending list right away; the approved
    /// player also shows up in the active list and roster once refetched.
    pub async fn approve_player(&self, id: &str) -> Result<(), ApiError> {
        let api = self.api.clone();
        let result = self
            .mutations
            .mutate(
                &keys::player_requests(),
                |requests: Option<&Vec<Player>>| without_id(requests, id),
                |cancel| async move { api.approve_player(id, cancel).await },
            )
            .await;
        self.store().invalidate(&keys::active_players());
        self.store().invalidate(&keys::roster());
        result
    }

    pub async fn reject_player(&self, id: &str) -> Result<(), ApiError> {
        let api = self.api.clone();
        self.mutations
            .mutate(
                &keys::player_requests(),
                |requests: Option<&Vec<Player>>| without_id(requests, id),
                |cancel| async move { api.reject_player(id, cancel).await },
            )
            .await
    }

    // ===== Blog posts =====

    pub fn blog_posts(&self) -> QueryHandle<Vec<BlogPost>> {
        let fetch = self.read(|api, cancel| async move { api.blog_posts(cancel).await });
        self.queries.query(keys::blog_posts(), fetch)
    }

    /// Approval changes server-side fields only, so there is nothing to
    /// apply locally; the list is refetched when it settles.
    pub async fn approve_blog_post(&self, id: &str) -> Result<(), ApiError> {
        let api = self.api.clone();
        self.mutations
            .commit_and_invalidate(&keys::blog_posts(), |cancel| async move {
                api.edit_blog_post(id, json!({ "status": "approved" }), cancel).await
            })
            .await
    }

    pub async fn delete_blog_post(&self, id: &str) -> Result<(), ApiError> {
        let api = self.api.clone();
        self.mutations
            .mutate(
                &keys::blog_posts(),
                |posts: Option<&Vec<BlogPost>>| without_id(posts, id),
                |cancel| async move { api.delete_blog_post(id, cancel).await },
            )
            .await
    }

    // ===== Leagues =====

    pub fn leagues(&self) -> QueryHandle<Vec<League>> {
        let fetch = self.read(|api, cancel| async move { api.leagues(cancel).await });
        self.queries.query(keys::leagues(), fetch)
    }

    pub fn leagues_by_type(&self, league_type: LeagueType) -> QueryHandle<Vec<League>> {
        let fetch = self.read(move |api, cancel| async move { api.leagues_by_type(league_type, cancel).await });
        self.queries.query(keys::leagues_by_type(league_type), fetch)
    }

    pub fn active_leagues(&self) -> QueryHandle<Vec<League>> {
        let fetch = self.read(|api, cancel| async move { api.active_leagues(cancel).await });
        self.queries.query(keys::active_leagues(), fetch)
    }

    pub fn league_standings(&self, league_id: &str) -> QueryHandle<Vec<LeagueStanding>> {
        let id = league_id.to_string();
        let fetch = self.read(move |api, cancel| {
            let id = id.clone();
            async move { api.league_standings(&id, cancel).await }
        });
        self.queries.query(keys::standings(league_id), fetch)
    }

    // ===== Matches =====

    pub fn matches(&self) -> QueryHandle<Vec<Match>> {
        let fetch = self.read(|api, cancel| async move { api.matches(cancel).await });
        self.queries.query(keys::matches(), fetch)
    }

    pub fn upcoming_matches(&self, limit: u32) -> QueryHandle<Vec<Match>> {
        let fetch = self.read(move |api, cancel| async move { api.upcoming_matches(limit, cancel).await });
        self.queries.query(keys::upcoming_matches(limit), fetch)
    }

    pub fn recent_matches(&self, limit: u32) -> QueryHandle<Vec<Match>> {
        let fetch = self.read(move |api, cancel| async move { api.recent_matches(limit, cancel).await });
        self.queries.query(keys::recent_matches(limit), fetch)
    }

    pub fn matches_by_league(&self, league_id: &str) -> QueryHandle<Vec<Match>> {
        let id = league_id.to_string();
        let fetch = self.read(move |api, cancel| {
            let id = id.clone();
            async move { api.matches_by_league(&id, cancel).await }
        });
        self.queries.query(keys::matches_by_league(league_id), fetch)
    }

    pub fn matches_by_team(&self, team_id: &str) -> QueryHandle<Vec<Match>> {
        let id = team_id.to_string();
        let fetch = self.read(move |api, cancel| {
            let id = id.clone();
            async move { api.matches_by_team(&id, cancel).await }
        });
        self.queries.query(keys::matches_by_team(team_id), fetch)
    }

    pub fn match_detail(&self, match_id: &str) -> QueryHandle<Match> {
        let id = match_id.to_string();
        let fetch = self.read(move |api, cancel| {
            let id = id.clone();
            async move { api.match_detail(&id, cancel).await }
        });
        self.queries.query(keys::match_detail(match_id), fetch)
    }

    /// Mark every cached match listing for refetch.
    pub fn invalidate_matches(&self) {
        self.store().invalidate_matching(&keys::matches());
    }
}
