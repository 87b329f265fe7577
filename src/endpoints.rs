//! Endpoint wrappers.
//!
//! Each method maps to one API path. Wrappers never talk to the network
//! themselves: they build an [`ApiRequest`], check its parameters against the
//! method's allow-list, and hand it to a [`Requester`]. Both clients implement
//! `Requester`, so the same catalogue serves blocking and async code:
//!
//! ```no_run
//! use cocapi::{request::params, ClientBuilder};
//!
//! # fn example() -> Result<(), cocapi::Error> {
//! let client = ClientBuilder::new("my-token").build()?;
//! let members = client.api().clan_members("#2PP", Some(params([("limit", 10)])));
//! # Ok(())
//! # }
//! ```
//!
//! A request with a parameter outside the allow-list is answered with the
//! `invalid_param` error payload without any network activity.

use crate::client::{AsyncClient, BlockingClient};
use crate::error::ErrorPayload;
use crate::request::{ApiRequest, Params, PAGING_PARAMS};
use serde_json::{json, Value};
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;

/// Filters accepted by clan search in addition to the paging parameters.
pub const CLAN_SEARCH_PARAMS: &[&str] = &[
    "name",
    "warFrequency",
    "locationId",
    "minMembers",
    "maxMembers",
    "minClanPoints",
    "minClanLevel",
    "labelIds",
    "limit",
    "after",
    "before",
];

/// Boxed future returned by async endpoint calls.
pub type ApiFuture = Pin<Box<dyn Future<Output = crate::Result<Value>> + Send + 'static>>;

/// Something that can execute a request on behalf of the endpoint wrappers.
pub trait Requester {
    /// What a call yields: a payload, or a future of one.
    type Output;

    /// Executes a validated request.
    fn send(&self, request: ApiRequest) -> Self::Output;

    /// Answers a request that was rejected before reaching the network.
    fn reject(&self, payload: ErrorPayload) -> Self::Output;
}

impl Requester for BlockingClient {
    type Output = Value;

    fn send(&self, request: ApiRequest) -> Value {
        self.call(request)
    }

    fn reject(&self, payload: ErrorPayload) -> Value {
        use crate::ClientAdmin;
        self.executor().reject(payload)
    }
}

impl Requester for AsyncClient {
    type Output = ApiFuture;

    fn send(&self, request: ApiRequest) -> ApiFuture {
        let client = self.clone();
        Box::pin(async move { client.call_async(request).await })
    }

    fn reject(&self, payload: ErrorPayload) -> ApiFuture {
        use crate::ClientAdmin;
        let value = self.executor().reject(payload);
        Box::pin(std::future::ready(Ok(value)))
    }
}

impl BlockingClient {
    /// The endpoint catalogue for this client.
    pub fn api(&self) -> Api<'_, Self> {
        Api::new(self)
    }
}

impl AsyncClient {
    /// The endpoint catalogue for this client.
    pub fn api(&self) -> Api<'_, Self> {
        Api::new(self)
    }
}

/// Encodes a player, clan or war tag for use in a path.
///
/// ```
/// assert_eq!(cocapi::endpoints::encode_tag("#2PP"), "%232PP");
/// assert_eq!(cocapi::endpoints::encode_tag("2PP"), "%232PP");
/// ```
pub fn encode_tag(tag: &str) -> String {
    let tag = tag.strip_prefix('#').unwrap_or(tag);
    let encoded: String = url::form_urlencoded::byte_serialize(tag.as_bytes()).collect();
    format!("%23{}", encoded)
}

/// The endpoint catalogue over a [`Requester`].
#[derive(Debug)]
pub struct Api<'a, R> {
    requester: &'a R,
}

impl<'a, R: Requester> Api<'a, R> {
    pub fn new(requester: &'a R) -> Self {
        Self { requester }
    }

    fn get(&self, path: String, params: Option<Params>, allowed: &[&str]) -> R::Output {
        let request = ApiRequest::get(path).with_query_params(params.unwrap_or_default());
        match request.validate_params(allowed) {
            Ok(()) => self.requester.send(request),
            Err(e) => {
                tracing::warn!(path = %request.path, error = ?e, "Rejected request parameters");
                self.requester.reject(e.to_payload())
            }
        }
    }

    fn paged(&self, path: String, params: Option<Params>) -> R::Output {
        self.get(path, params, PAGING_PARAMS)
    }

    fn fixed(&self, path: String) -> R::Output {
        self.get(path, None, &[])
    }

    // Clans

    /// Clan details.
    pub fn clan(&self, tag: &str, params: Option<Params>) -> R::Output {
        self.paged(format!("/clans/{}", encode_tag(tag)), params)
    }

    pub fn clan_members(&self, tag: &str, params: Option<Params>) -> R::Output {
        self.paged(format!("/clans/{}/members", encode_tag(tag)), params)
    }

    pub fn clan_current_war(&self, tag: &str) -> R::Output {
        self.fixed(format!("/clans/{}/currentwar", encode_tag(tag)))
    }

    pub fn clan_war_log(&self, tag: &str, params: Option<Params>) -> R::Output {
        self.paged(format!("/clans/{}/warlog", encode_tag(tag)), params)
    }

    /// The clan's current clan war league group.
    pub fn clan_league_group(&self, tag: &str) -> R::Output {
        self.fixed(format!("/clans/{}/currentwar/leaguegroup", encode_tag(tag)))
    }

    pub fn clan_capital_raid_seasons(&self, tag: &str, params: Option<Params>) -> R::Output {
        self.paged(format!("/clans/{}/capitalraidseasons", encode_tag(tag)), params)
    }

    /// Searches clans by name. `params` may add any of [`CLAN_SEARCH_PARAMS`].
    pub fn search_clans(&self, name: &str, limit: u32, params: Option<Params>) -> R::Output {
        let mut params = params.unwrap_or_default();
        params.insert("name".to_string(), name.to_string());
        params.insert("limit".to_string(), limit.to_string());
        self.get("/clans".to_string(), Some(params), CLAN_SEARCH_PARAMS)
    }

    // Players

    pub fn player(&self, tag: &str, params: Option<Params>) -> R::Output {
        self.paged(format!("/players/{}", encode_tag(tag)), params)
    }

    /// Verifies a player's in-game API token. This is the only POST endpoint.
    pub fn verify_player_token(&self, tag: &str, token: &str) -> R::Output {
        self.requester.send(ApiRequest::post(
            format!("/players/{}/verifytoken", encode_tag(tag)),
            json!({ "token": token }),
        ))
    }

    // Clan war leagues

    pub fn war_league_war(&self, war_tag: &str) -> R::Output {
        self.fixed(format!("/clanwarleagues/wars/{}", encode_tag(war_tag)))
    }

    // Locations

    pub fn locations(&self, params: Option<Params>) -> R::Output {
        self.paged("/locations".to_string(), params)
    }

    pub fn location(&self, location_id: impl Display) -> R::Output {
        self.fixed(format!("/locations/{}", location_id))
    }

    pub fn location_clan_rankings(&self, location_id: impl Display, params: Option<Params>) -> R::Output {
        self.paged(format!("/locations/{}/rankings/clans", location_id), params)
    }

    pub fn location_player_rankings(&self, location_id: impl Display, params: Option<Params>) -> R::Output {
        self.paged(format!("/locations/{}/rankings/players", location_id), params)
    }

    pub fn location_clan_versus_rankings(&self, location_id: impl Display, params: Option<Params>) -> R::Output {
        self.paged(format!("/locations/{}/rankings/clans-versus", location_id), params)
    }

    pub fn location_player_versus_rankings(&self, location_id: impl Display, params: Option<Params>) -> R::Output {
        self.paged(format!("/locations/{}/rankings/players-versus", location_id), params)
    }

    pub fn location_clan_builder_base_rankings(
        &self,
        location_id: impl Display,
        params: Option<Params>,
    ) -> R::Output {
        self.paged(
            format!("/locations/{}/rankings/clans-builder-base", location_id),
            params,
        )
    }

    pub fn location_player_builder_base_rankings(
        &self,
        location_id: impl Display,
        params: Option<Params>,
    ) -> R::Output {
        self.paged(
            format!("/locations/{}/rankings/players-builder-base", location_id),
            params,
        )
    }

    // Leagues

    pub fn leagues(&self, params: Option<Params>) -> R::Output {
        self.paged("/leagues".to_string(), params)
    }

    pub fn league(&self, league_id: impl Display) -> R::Output {
        self.fixed(format!("/leagues/{}", league_id))
    }

    pub fn league_seasons(&self, league_id: impl Display, params: Option<Params>) -> R::Output {
        self.paged(format!("/leagues/{}/seasons", league_id), params)
    }

    /// Rankings for one league season, e.g. `"2024-05"`.
    pub fn league_season(
        &self,
        league_id: impl Display,
        season_id: impl Display,
        params: Option<Params>,
    ) -> R::Output {
        self.paged(format!("/leagues/{}/seasons/{}", league_id, season_id), params)
    }

    pub fn war_leagues(&self) -> R::Output {
        self.fixed("/warleagues".to_string())
    }

    pub fn war_league(&self, league_id: impl Display) -> R::Output {
        self.fixed(format!("/warleagues/{}", league_id))
    }

    pub fn capital_leagues(&self, params: Option<Params>) -> R::Output {
        self.paged("/capitalleagues".to_string(), params)
    }

    pub fn capital_league(&self, league_id: impl Display) -> R::Output {
        self.fixed(format!("/capitalleagues/{}", league_id))
    }

    pub fn builder_base_leagues(&self, params: Option<Params>) -> R::Output {
        self.paged("/builderbaseleagues".to_string(), params)
    }

    pub fn builder_base_league(&self, league_id: impl Display) -> R::Output {
        self.fixed(format!("/builderbaseleagues/{}", league_id))
    }

    // Labels

    pub fn clan_labels(&self, params: Option<Params>) -> R::Output {
        self.paged("/labels/clans".to_string(), params)
    }

    pub fn player_labels(&self, params: Option<Params>) -> R::Output {
        self.paged("/labels/players".to_string(), params)
    }

    // Gold pass

    pub fn gold_pass(&self) -> R::Output {
        self.fixed("/goldpass/seasons/current".to_string())
    }

    /// Calls a path the catalogue does not cover yet.
    ///
    /// A missing leading `/` is added. Parameters are passed through unchecked.
    pub fn custom_endpoint(&self, path: &str, params: Option<Params>) -> R::Output {
        self.requester
            .send(ApiRequest::get(path).with_query_params(params.unwrap_or_default()))
    }
}
