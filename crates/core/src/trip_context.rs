//! Derived trip context, kept up to date from the tools the backend runs.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDate;
use tripagent_model::{ConversationId, ToolCall, TripDetails};

use crate::error::CacheError;
use crate::response_queue::QueuedResponse;

/// Refreshes derived data once a response has been persisted.
#[async_trait]
pub trait CacheUpdater: Send + Sync {
    /// Updates the cache with what was learned from `response`.
    async fn update_from_response(
        &self,
        conversation_id: &ConversationId,
        response: &QueuedResponse,
    ) -> Result<(), CacheError>;

    /// Drops whatever was derived for a deleted conversation.
    async fn forget(
        &self,
        _conversation_id: &ConversationId,
    ) -> Result<(), CacheError> {
        Ok(())
    }
}

/// What is known about the trip planned in a conversation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TripSummary {
    /// Park codes and names that were looked up.
    pub parks: BTreeSet<String>,
    /// Cities and airports that were searched.
    pub destinations: BTreeSet<String>,
    /// Earliest travel date seen.
    pub start_date: Option<NaiveDate>,
    /// Latest travel date seen.
    pub end_date: Option<NaiveDate>,
    /// Travellers mentioned in a booking search.
    pub travelers: Option<u32>,
    /// Set once charging stations were searched.
    pub needs_ev_charging: bool,
}

impl TripSummary {
    /// Folds a tool call into the summary.
    pub fn record(&mut self, call: &ToolCall) {
        match call {
            ToolCall::GetParkDetails { park_code }
            | ToolCall::SearchTrails { park_code, .. } => {
                self.parks.insert(park_code.clone());
            }
            ToolCall::SearchWildlife { park_code, .. }
            | ToolCall::SearchCampgrounds { park_code, .. } => {
                if let Some(code) = park_code {
                    self.parks.insert(code.clone());
                }
            }
            ToolCall::GetParkPhotos { park_name } => {
                self.parks.insert(park_name.clone());
            }
            ToolCall::SearchFlights {
                destination,
                departure_date,
                return_date,
                adults,
                ..
            } => {
                self.destinations.insert(destination.clone());
                self.add_dates(Some(*departure_date), *return_date);
                self.travelers = adults.or(self.travelers);
            }
            ToolCall::SearchHotels {
                location,
                check_in,
                check_out,
                guests,
            } => {
                self.destinations.insert(location.clone());
                self.add_dates(Some(*check_in), Some(*check_out));
                self.travelers = guests.or(self.travelers);
            }
            ToolCall::SearchCarRentals {
                pickup_location,
                pickup_date,
                dropoff_date,
            } => {
                self.destinations.insert(pickup_location.clone());
                self.add_dates(Some(*pickup_date), Some(*dropoff_date));
            }
            ToolCall::SearchRestaurants { location, .. } => {
                self.destinations.insert(location.clone());
            }
            ToolCall::GetDirections { destination, .. } => {
                self.destinations.insert(destination.clone());
            }
            ToolCall::FindEvChargers { .. } => self.needs_ev_charging = true,
            ToolCall::SearchNationalParks { .. }
            | ToolCall::SearchStateParks { .. } => {}
        }
    }

    fn add_dates(&mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) {
        if let Some(start) = start {
            self.start_date = Some(self.start_date.map_or(start, |d| d.min(start)));
        }
        if let Some(end) = end {
            self.end_date = Some(self.end_date.map_or(end, |d| d.max(end)));
        }
    }

    /// Returns `true` if nothing has been learned yet.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Converts the summary into trip details for the next request.
    pub fn to_trip_details(&self) -> TripDetails {
        let destination = self
            .parks
            .iter()
            .next()
            .or(self.destinations.iter().next())
            .cloned();
        TripDetails {
            destination,
            start_date: self.start_date,
            end_date: self.end_date,
            travelers: self.travelers,
        }
    }
}

/// Keeps a [`TripSummary`] per conversation.
#[derive(Debug, Default)]
pub struct TripContextCache {
    summaries: Mutex<HashMap<ConversationId, TripSummary>>,
}

impl TripContextCache {
    /// Returns the summary of a conversation, if anything is known about
    /// its trip.
    pub fn summary(&self, conversation_id: &ConversationId) -> Option<TripSummary> {
        self.lock()
            .get(conversation_id)
            .filter(|summary| !summary.is_empty())
            .cloned()
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, HashMap<ConversationId, TripSummary>> {
        self.summaries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CacheUpdater for TripContextCache {
    async fn update_from_response(
        &self,
        conversation_id: &ConversationId,
        response: &QueuedResponse,
    ) -> Result<(), CacheError> {
        if response.tools_used.is_empty() {
            return Ok(());
        }
        let mut summaries = self.lock();
        let summary = summaries.entry(conversation_id.clone()).or_default();
        for call in &response.tools_used {
            summary.record(call);
        }
        trace!("trip summary of {conversation_id}: {summary:?}");
        Ok(())
    }

    async fn forget(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<(), CacheError> {
        self.lock().remove(conversation_id);
        Ok(())
    }
}

/// Ignores every update.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCache;

#[async_trait]
impl CacheUpdater for NoopCache {
    async fn update_from_response(
        &self,
        _conversation_id: &ConversationId,
        _response: &QueuedResponse,
    ) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_summary_from_tools() {
        let cache = TripContextCache::default();
        let id = ConversationId::new("trip");
        let response = QueuedResponse {
            conversation_id: id.clone(),
            tools_used: vec![
                ToolCall::GetParkDetails {
                    park_code: "yose".to_owned(),
                },
                ToolCall::SearchFlights {
                    origin: "SFO".to_owned(),
                    destination: "FAT".to_owned(),
                    departure_date: date(6, 3),
                    return_date: Some(date(6, 9)),
                    adults: Some(2),
                },
                ToolCall::SearchHotels {
                    location: "Mariposa".to_owned(),
                    check_in: date(6, 2),
                    check_out: date(6, 8),
                    guests: None,
                },
                ToolCall::FindEvChargers {
                    latitude: 37.7,
                    longitude: -119.6,
                    radius_miles: None,
                },
            ],
            ..Default::default()
        };
        cache.update_from_response(&id, &response).await.unwrap();

        let summary = cache.summary(&id).unwrap();
        assert!(summary.needs_ev_charging);
        assert_eq!(summary.start_date, Some(date(6, 2)));
        assert_eq!(summary.end_date, Some(date(6, 9)));

        let details = summary.to_trip_details();
        assert_eq!(details.destination.as_deref(), Some("yose"));
        assert_eq!(details.travelers, Some(2));
    }

    #[tokio::test]
    async fn test_responses_without_tools_are_ignored() {
        let cache = TripContextCache::default();
        let id = ConversationId::new("trip");
        cache
            .update_from_response(&id, &QueuedResponse::default())
            .await
            .unwrap();
        assert!(cache.summary(&id).is_none());
    }

    #[tokio::test]
    async fn test_summary_hidden_until_something_is_learned() {
        let cache = TripContextCache::default();
        let id = ConversationId::new("trip");
        let response = QueuedResponse {
            tools_used: vec![ToolCall::SearchNationalParks {
                query: None,
                state_code: Some("UT".to_owned()),
            }],
            ..Default::default()
        };
        cache.update_from_response(&id, &response).await.unwrap();
        assert!(cache.summary(&id).is_none());
    }

    #[tokio::test]
    async fn test_forget() {
        let cache = TripContextCache::default();
        let id = ConversationId::new("trip");
        let response = QueuedResponse {
            tools_used: vec![ToolCall::GetParkDetails {
                park_code: "arch".to_owned(),
            }],
            ..Default::default()
        };
        cache.update_from_response(&id, &response).await.unwrap();
        assert!(cache.summary(&id).is_some());

        cache.forget(&id).await.unwrap();
        assert!(cache.summary(&id).is_none());
    }
}
