use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ambient information sent along with every request, so the assistant
/// can tailor its answers without the user repeating themselves.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatContext {
    /// Where the user currently is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<UserLocation>,
    /// The trip being planned, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip: Option<TripDetails>,
    /// Travel preferences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<TravelPreferences>,
    /// Free-form values understood by the backend.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extras: Map<String, Value>,
}

/// A geographic position of the user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLocation {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// A human-readable place name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

/// Known facts about the trip being planned.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripDetails {
    /// A park, city or region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// First day of the trip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    /// Last day of the trip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Number of people travelling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub travelers: Option<u32>,
}

/// How the user likes to travel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TravelPreferences {
    /// Spending level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<BudgetLevel>,
    /// Activities the user enjoys, e.g. `hiking` or `photography`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interests: Vec<String>,
    /// The vehicle used for road trips.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle: Option<VehicleKind>,
}

/// Spending level for bookings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetLevel {
    #[allow(missing_docs)]
    Budget,
    #[allow(missing_docs)]
    Moderate,
    #[allow(missing_docs)]
    Luxury,
}

/// Drivetrain of the user's vehicle. Electric vehicles make the assistant
/// plan charging stops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleKind {
    #[allow(missing_docs)]
    Gas,
    #[allow(missing_docs)]
    Hybrid,
    #[allow(missing_docs)]
    Electric,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_serialize_context() {
        let context = ChatContext {
            location: Some(UserLocation {
                latitude: 37.77,
                longitude: -122.42,
                city: Some("San Francisco".to_owned()),
            }),
            trip: Some(TripDetails {
                destination: Some("Yosemite".to_owned()),
                start_date: NaiveDate::from_ymd_opt(2026, 6, 1),
                ..Default::default()
            }),
            preferences: Some(TravelPreferences {
                vehicle: Some(VehicleKind::Electric),
                ..Default::default()
            }),
            extras: Map::new(),
        };
        let value = serde_json::to_value(&context).unwrap();
        assert_eq!(
            value,
            json!({
                "location": {
                    "latitude": 37.77,
                    "longitude": -122.42,
                    "city": "San Francisco"
                },
                "trip": {
                    "destination": "Yosemite",
                    "startDate": "2026-06-01"
                },
                "preferences": { "vehicle": "electric" }
            })
        );
        let back: ChatContext = serde_json::from_value(value).unwrap();
        assert_eq!(back, context);
    }

    #[test]
    fn test_empty_context() {
        let value = serde_json::to_value(ChatContext::default()).unwrap();
        assert_eq!(value, json!({}));
    }
}
