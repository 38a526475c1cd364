use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The tools the chat backend can call on behalf of the assistant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// National Park Service park search.
    SearchNationalParks,
    /// Full details of one national park.
    GetParkDetails,
    /// State and local parks from the protected areas database.
    SearchStateParks,
    /// Recreation.gov campgrounds.
    SearchCampgrounds,
    #[allow(missing_docs)]
    SearchFlights,
    #[allow(missing_docs)]
    SearchHotels,
    #[allow(missing_docs)]
    SearchCarRentals,
    #[allow(missing_docs)]
    SearchRestaurants,
    /// Charging stations near a point.
    FindEvChargers,
    /// Recent wildlife observations.
    SearchWildlife,
    #[allow(missing_docs)]
    SearchTrails,
    /// Driving directions between two places.
    GetDirections,
    /// Photos of a park or landmark.
    GetParkPhotos,
}

impl ToolKind {
    /// Returns the status line shown while the tool is running.
    pub fn status_label(self) -> &'static str {
        match self {
            ToolKind::SearchNationalParks => "Searching national parks...",
            ToolKind::GetParkDetails => "Looking up park details...",
            ToolKind::SearchStateParks => "Searching state parks...",
            ToolKind::SearchCampgrounds => "Finding campgrounds...",
            ToolKind::SearchFlights => "Searching flights...",
            ToolKind::SearchHotels => "Searching hotels...",
            ToolKind::SearchCarRentals => "Checking car rentals...",
            ToolKind::SearchRestaurants => "Finding restaurants...",
            ToolKind::FindEvChargers => "Locating EV chargers...",
            ToolKind::SearchWildlife => "Looking for wildlife sightings...",
            ToolKind::SearchTrails => "Searching trails...",
            ToolKind::GetDirections => "Planning the route...",
            ToolKind::GetParkPhotos => "Finding photos...",
        }
    }
}

/// A tool invocation with its validated input.
///
/// On the wire a call looks like
/// `{"name": "search_flights", "input": {"origin": "SFO", ...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "name",
    content = "input",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
#[allow(missing_docs)]
pub enum ToolCall {
    SearchNationalParks {
        #[serde(default)]
        query: Option<String>,
        #[serde(default)]
        state_code: Option<String>,
    },
    GetParkDetails {
        park_code: String,
    },
    SearchStateParks {
        state: String,
        #[serde(default)]
        query: Option<String>,
    },
    SearchCampgrounds {
        #[serde(default)]
        park_code: Option<String>,
        #[serde(default)]
        near: Option<String>,
    },
    SearchFlights {
        origin: String,
        destination: String,
        departure_date: NaiveDate,
        #[serde(default)]
        return_date: Option<NaiveDate>,
        #[serde(default)]
        adults: Option<u32>,
    },
    SearchHotels {
        location: String,
        check_in: NaiveDate,
        check_out: NaiveDate,
        #[serde(default)]
        guests: Option<u32>,
    },
    SearchCarRentals {
        pickup_location: String,
        pickup_date: NaiveDate,
        dropoff_date: NaiveDate,
    },
    SearchRestaurants {
        location: String,
        #[serde(default)]
        cuisine: Option<String>,
    },
    FindEvChargers {
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        radius_miles: Option<f64>,
    },
    SearchWildlife {
        #[serde(default)]
        park_code: Option<String>,
        #[serde(default)]
        taxon: Option<String>,
    },
    SearchTrails {
        park_code: String,
        #[serde(default)]
        difficulty: Option<String>,
    },
    GetDirections {
        origin: String,
        destination: String,
    },
    GetParkPhotos {
        park_name: String,
    },
}

impl ToolCall {
    /// Returns which tool was called.
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolCall::SearchNationalParks { .. } => {
                ToolKind::SearchNationalParks
            }
            ToolCall::GetParkDetails { .. } => ToolKind::GetParkDetails,
            ToolCall::SearchStateParks { .. } => ToolKind::SearchStateParks,
            ToolCall::SearchCampgrounds { .. } => ToolKind::SearchCampgrounds,
            ToolCall::SearchFlights { .. } => ToolKind::SearchFlights,
            ToolCall::SearchHotels { .. } => ToolKind::SearchHotels,
            ToolCall::SearchCarRentals { .. } => ToolKind::SearchCarRentals,
            ToolCall::SearchRestaurants { .. } => ToolKind::SearchRestaurants,
            ToolCall::FindEvChargers { .. } => ToolKind::FindEvChargers,
            ToolCall::SearchWildlife { .. } => ToolKind::SearchWildlife,
            ToolCall::SearchTrails { .. } => ToolKind::SearchTrails,
            ToolCall::GetDirections { .. } => ToolKind::GetDirections,
            ToolCall::GetParkPhotos { .. } => ToolKind::GetParkPhotos,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_deserialize_tool_call() {
        let call: ToolCall = serde_json::from_value(json!({
            "name": "search_flights",
            "input": {
                "origin": "SFO",
                "destination": "FAT",
                "departureDate": "2026-06-01"
            }
        }))
        .unwrap();
        assert_eq!(call.kind(), ToolKind::SearchFlights);
        assert_eq!(
            call,
            ToolCall::SearchFlights {
                origin: "SFO".to_owned(),
                destination: "FAT".to_owned(),
                departure_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
                return_date: None,
                adults: None,
            }
        );
    }

    #[test]
    fn test_reject_invalid_input() {
        let result = serde_json::from_value::<ToolCall>(json!({
            "name": "get_park_details",
            "input": {}
        }));
        assert!(result.is_err());

        let result = serde_json::from_value::<ToolCall>(json!({
            "name": "book_spaceship",
            "input": {}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_status_label() {
        let kind: ToolKind =
            serde_json::from_value(json!("find_ev_chargers")).unwrap();
        assert_eq!(kind.status_label(), "Locating EV chargers...");
    }
}
