//! # Record Transformer
//! Pure mapping `SourceRecord` → `NormalizedEvent`. No I/O.
//!
//! Optional source fields are omitted from `event_details` when absent rather
//! than written as nulls.

use serde_json::{Map, Value};

use crate::config::PullEventsConfig;
use crate::sync::types::{Location, NormalizedEvent, SourceRecord};

const UNKNOWN_TITLE: &str = "Unknown";

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn join_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn put<V: Into<Value>>(details: &mut Map<String, Value>, key: &str, v: Option<V>) {
    if let Some(v) = v {
        details.insert(key.to_string(), v.into());
    }
}

pub fn transform(record: &SourceRecord, config: &PullEventsConfig) -> NormalizedEvent {
    let source_id = record.id.to_string();
    let mut details = Map::new();

    details.insert("inat_id".into(), Value::String(source_id.clone()));
    put(&mut details, "captive", record.captive);
    put(&mut details, "location_obscured", record.obscured);
    details.insert("created_at".into(), record.created_at.to_rfc3339().into());
    put(&mut details, "place_guess", non_empty(&record.place_guess));
    put(&mut details, "quality_grade", non_empty(&record.quality_grade));
    put(&mut details, "species_guess", non_empty(&record.species_guess));
    details.insert("updated_at".into(), record.updated_at.to_rfc3339().into());
    put(&mut details, "inat_url", non_empty(&record.uri));

    if let Some(user) = &record.user {
        details.insert("user_id".into(), user.id.into());
        put(
            &mut details,
            "user_name",
            non_empty(&user.name).or(non_empty(&user.login)),
        );
    }

    if !record.place_ids.is_empty() {
        details.insert("place_ids".into(), join_ids(&record.place_ids).into());
    }

    let mut title = None;
    if let Some(taxon) = &record.taxon {
        details.insert("taxon_id".into(), taxon.id.into());
        put(&mut details, "taxon_rank", non_empty(&taxon.rank));
        put(&mut details, "taxon_name", non_empty(&taxon.name));
        put(
            &mut details,
            "taxon_common_name",
            non_empty(&taxon.preferred_common_name),
        );
        put(
            &mut details,
            "taxon_wikipedia_url",
            non_empty(&taxon.wikipedia_url),
        );
        put(
            &mut details,
            "taxon_conservation_status",
            taxon.conservation_status.clone().filter(|v| !v.is_null()),
        );
        if !taxon.ancestor_ids.is_empty() {
            details.insert(
                "taxon_ancestors".into(),
                join_ids(&taxon.ancestor_ids).into(),
            );
        }
        title = non_empty(&taxon.preferred_common_name);
    }

    let title = title
        .or(non_empty(&record.species_guess))
        .unwrap_or(UNKNOWN_TITLE);

    NormalizedEvent {
        source_id,
        event_type: config.event_type.clone(),
        recorded_at: record.observed_on.unwrap_or(record.created_at),
        title: format!("{}{}", config.event_prefix, title),
        location: record.location.map(|(lat, lon)| Location { lat, lon }),
        event_details: details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::types::{SourceUser, Taxon};
    use chrono::{TimeZone, Utc};

    fn bare(id: u64) -> SourceRecord {
        SourceRecord {
            id,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap(),
            observed_on: None,
            location: None,
            captive: None,
            obscured: None,
            place_guess: None,
            quality_grade: None,
            species_guess: None,
            uri: None,
            user: None,
            place_ids: vec![],
            taxon: None,
            photos: vec![],
            annotations: vec![],
        }
    }

    fn taxon(common: Option<&str>) -> Taxon {
        Taxon {
            id: 3,
            rank: Some("class".into()),
            name: Some("Aves".into()),
            preferred_common_name: common.map(String::from),
            wikipedia_url: None,
            conservation_status: None,
            ancestor_ids: vec![48460, 1, 2, 355675],
        }
    }

    #[test]
    fn title_prefers_common_name_then_guess_then_unknown() {
        let cfg = PullEventsConfig::default();

        let mut r = bare(1);
        r.taxon = Some(taxon(Some("Birds")));
        r.species_guess = Some("Robin".into());
        assert_eq!(transform(&r, &cfg).title, "iNat: Birds");

        r.taxon = Some(taxon(None));
        assert_eq!(transform(&r, &cfg).title, "iNat: Robin");

        r.species_guess = Some("".into());
        assert_eq!(transform(&r, &cfg).title, "iNat: Unknown");

        let custom = PullEventsConfig {
            event_prefix: "Obs - ".into(),
            ..Default::default()
        };
        assert_eq!(transform(&bare(2), &custom).title, "Obs - Unknown");
    }

    #[test]
    fn recorded_at_prefers_observed_on() {
        let cfg = PullEventsConfig::default();
        let mut r = bare(1);
        assert_eq!(transform(&r, &cfg).recorded_at, r.created_at);

        let observed = Utc.with_ymd_and_hms(2024, 4, 30, 0, 0, 0).unwrap();
        r.observed_on = Some(observed);
        assert_eq!(transform(&r, &cfg).recorded_at, observed);
    }

    #[test]
    fn optional_fields_are_omitted_not_nulled() {
        let cfg = PullEventsConfig::default();
        let ev = transform(&bare(9), &cfg);
        assert_eq!(ev.event_details["inat_id"], "9");
        assert_eq!(ev.source_id, "9");
        assert_eq!(ev.event_type, "inat_observation");
        assert!(ev.location.is_none());
        for key in ["captive", "place_guess", "user_id", "taxon_id", "place_ids"] {
            assert!(!ev.event_details.contains_key(key), "{key} should be absent");
        }
        assert!(ev.event_details.values().all(|v| !v.is_null()));
    }

    #[test]
    fn ids_are_comma_joined_and_user_falls_back_to_login() {
        let cfg = PullEventsConfig::default();
        let mut r = bare(5);
        r.location = Some((41.88, -87.62));
        r.place_ids = vec![1, 97394, 6712];
        r.taxon = Some(taxon(Some("Birds")));
        r.user = Some(SourceUser {
            id: 77,
            name: None,
            login: Some("birder".into()),
        });
        r.captive = Some(false);

        let ev = transform(&r, &cfg);
        assert_eq!(ev.location, Some(Location { lat: 41.88, lon: -87.62 }));
        assert_eq!(ev.event_details["place_ids"], "1,97394,6712");
        assert_eq!(ev.event_details["taxon_ancestors"], "48460,1,2,355675");
        assert_eq!(ev.event_details["taxon_id"], 3);
        assert_eq!(ev.event_details["user_id"], 77);
        assert_eq!(ev.event_details["user_name"], "birder");
        assert_eq!(ev.event_details["captive"], false);
    }

    #[test]
    fn transform_is_deterministic() {
        let cfg = PullEventsConfig::default();
        let mut r = bare(3);
        r.taxon = Some(taxon(Some("Birds")));
        assert_eq!(transform(&r, &cfg), transform(&r, &cfg));
    }
}
