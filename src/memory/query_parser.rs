//! Query analysis
//!
//! Turns raw query text into a [`QueryPlan`]: the cached embedding, the
//! requested fact-type partitions, and an optional temporal range.
//!
//! Temporal detection supports a closed set of expressions:
//! - seasons with a qualifier: "last spring", "in winter", "summer 2023"
//! - months with a qualifier: "in June", "last June", "June 2024"
//! - "between March and May" (optional trailing year)
//! - bare year: "2023"
//!
//! Seasons use the hemisphere-agnostic calendar: spring Mar 1-May 31,
//! summer Jun 1-Aug 31, autumn Sep 1-Nov 30, winter Dec 1-end of Feb.
//! "last X" resolves against the caller-supplied `now`, never the wall
//! clock. Anything outside the closed set yields `None`; the analyzer
//! never guesses a range.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::embeddings::CachedEmbedder;
use crate::errors::EngineError;

use super::types::FactType;

/// Fully analyzed query, shared across the four strategy tasks.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub query_text: String,
    pub query_vec: Arc<Vec<f32>>,
    pub temporal_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Requested fact-type partitions, in canonical order.
    pub fact_types: Vec<FactType>,
    pub seed: u64,
    /// Whether facts without `occurred_start` fall back to
    /// `mentioned_at` for temporal filtering.
    pub temporal_fallback: bool,
}

/// Build a [`QueryPlan`]. Pure given `(query, now)` and the embedder's
/// determinism contract: identical inputs always produce the same plan.
pub fn build_plan(
    query: &str,
    now: DateTime<Utc>,
    fact_types: Vec<FactType>,
    seed: u64,
    temporal_fallback: bool,
    embedder: &CachedEmbedder,
) -> Result<QueryPlan, EngineError> {
    let query_vec = embedder
        .encode(query)
        .map_err(|e| EngineError::EmbeddingFailed {
            detail: e.to_string(),
        })?;

    Ok(QueryPlan {
        query_text: query.to_string(),
        query_vec,
        temporal_range: detect_temporal_range(query, now),
        fact_types,
        seed,
        temporal_fallback,
    })
}

const MONTHS: &str =
    "january|february|march|april|may|june|july|august|september|october|november|december";
const SEASONS: &str = "spring|summer|autumn|fall|winter";

lazy_static! {
    static ref RE_BETWEEN: Regex = Regex::new(&format!(
        r"\bbetween\s+({MONTHS})\s+and\s+({MONTHS})(?:\s+(\d{{4}}))?\b"
    ))
    .expect("static regex");
    static ref RE_MONTH_YEAR: Regex =
        Regex::new(&format!(r"\b({MONTHS})\s+(\d{{4}})\b")).expect("static regex");
    static ref RE_SEASON_YEAR: Regex =
        Regex::new(&format!(r"\b({SEASONS})\s+(?:of\s+)?(\d{{4}})\b")).expect("static regex");
    static ref RE_QUALIFIED_SEASON: Regex =
        Regex::new(&format!(r"\b(last|in|during)\s+({SEASONS})\b")).expect("static regex");
    static ref RE_QUALIFIED_MONTH: Regex =
        Regex::new(&format!(r"\b(last|in|during)\s+({MONTHS})\b")).expect("static regex");
    static ref RE_YEAR: Regex = Regex::new(r"\b((?:19|20)\d{2})\b").expect("static regex");
}

/// Detect a temporal range in the query.
///
/// Pure: depends only on `(text, now)`. Returns `None` when no
/// supported expression is present.
pub fn detect_temporal_range(
    text: &str,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let lower = text.to_lowercase();

    // Most specific first: an explicit span beats a single month beats
    // a bare year.
    if let Some(caps) = RE_BETWEEN.captures(&lower) {
        let from = month_number(&caps[1])?;
        let to = month_number(&caps[2])?;
        let year = match caps.get(3) {
            Some(y) => y.as_str().parse::<i32>().ok()?,
            None => latest_year_with_month_started(to, now),
        };
        let (start, _) = month_bounds(year, from)?;
        let (_, end) = month_bounds(year, to)?;
        if start > end {
            // Inverted span ("between May and March") is ambiguous
            return None;
        }
        return Some((start, end));
    }

    if let Some(caps) = RE_MONTH_YEAR.captures(&lower) {
        let month = month_number(&caps[1])?;
        let year = caps[2].parse::<i32>().ok()?;
        return month_bounds(year, month);
    }

    if let Some(caps) = RE_SEASON_YEAR.captures(&lower) {
        return season_bounds(&caps[1], caps[2].parse::<i32>().ok()?);
    }

    if let Some(caps) = RE_QUALIFIED_SEASON.captures(&lower) {
        let qualifier = &caps[1];
        let season = caps.get(2)?.as_str();
        let mut year = now.year();
        let (start, end) = season_bounds(season, year)?;
        let resolved = if qualifier == "last" {
            // Most recent occurrence fully ended before `now`
            if end < now {
                (start, end)
            } else {
                season_bounds(season, year - 1)?
            }
        } else {
            // Most recent occurrence already started
            if start <= now {
                (start, end)
            } else {
                year -= 1;
                season_bounds(season, year)?
            }
        };
        return Some(resolved);
    }

    if let Some(caps) = RE_QUALIFIED_MONTH.captures(&lower) {
        let qualifier = &caps[1];
        let month = month_number(&caps[2])?;
        let year = if qualifier == "last" {
            // Strictly before the current month
            if month < now.month() {
                now.year()
            } else {
                now.year() - 1
            }
        } else {
            latest_year_with_month_started(month, now)
        };
        return month_bounds(year, month);
    }

    if let Some(caps) = RE_YEAR.captures(&lower) {
        let year = caps[1].parse::<i32>().ok()?;
        let start = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()?;
        let end = Utc.with_ymd_and_hms(year, 12, 31, 23, 59, 59).single()?;
        return Some((start, end));
    }

    None
}

fn month_number(name: &str) -> Option<u32> {
    match name {
        "january" => Some(1),
        "february" => Some(2),
        "march" => Some(3),
        "april" => Some(4),
        "may" => Some(5),
        "june" => Some(6),
        "july" => Some(7),
        "august" => Some(8),
        "september" => Some(9),
        "october" => Some(10),
        "november" => Some(11),
        "december" => Some(12),
        _ => None,
    }
}

/// Year of the most recent occurrence of `month` that has started.
fn latest_year_with_month_started(month: u32, now: DateTime<Utc>) -> i32 {
    if month <= now.month() {
        now.year()
    } else {
        now.year() - 1
    }
}

/// Inclusive calendar bounds of a month, midnight to 23:59:59.
fn month_bounds(year: i32, month: u32) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
    let (next_y, next_m) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let last_day = (Utc.with_ymd_and_hms(next_y, next_m, 1, 0, 0, 0).single()? - Duration::days(1))
        .day();
    let end = Utc
        .with_ymd_and_hms(year, month, last_day, 23, 59, 59)
        .single()?;
    Some((start, end))
}

/// Season bounds anchored to `year`. Winter of year Y is the winter
/// that ends in Y: Dec 1 (Y-1) through end of February Y.
fn season_bounds(season: &str, year: i32) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    match season {
        "spring" => {
            let (start, _) = month_bounds(year, 3)?;
            let (_, end) = month_bounds(year, 5)?;
            Some((start, end))
        }
        "summer" => {
            let (start, _) = month_bounds(year, 6)?;
            let (_, end) = month_bounds(year, 8)?;
            Some((start, end))
        }
        "autumn" | "fall" => {
            let (start, _) = month_bounds(year, 9)?;
            let (_, end) = month_bounds(year, 11)?;
            Some((start, end))
        }
        "winter" => {
            let (start, _) = month_bounds(year - 1, 12)?;
            let (_, end) = month_bounds(year, 2)?;
            Some((start, end))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn date_of(dt: DateTime<Utc>) -> (i32, u32, u32) {
        (dt.year(), dt.month(), dt.day())
    }

    #[test]
    fn test_last_spring_resolves_against_now() {
        let now = at(2024, 11, 25);
        let (start, end) =
            detect_temporal_range("What did Alice do last spring?", now).expect("range");
        assert_eq!(date_of(start), (2024, 3, 1));
        assert_eq!(date_of(end), (2024, 5, 31));
    }

    #[test]
    fn test_last_spring_during_spring_steps_back_a_year() {
        let now = at(2024, 4, 15);
        let (start, end) = detect_temporal_range("last spring", now).expect("range");
        assert_eq!(date_of(start), (2023, 3, 1));
        assert_eq!(date_of(end), (2023, 5, 31));
    }

    #[test]
    fn test_winter_spans_the_year_boundary() {
        let now = at(2024, 11, 25);
        let (start, end) = detect_temporal_range("last winter", now).expect("range");
        assert_eq!(date_of(start), (2023, 12, 1));
        assert_eq!(date_of(end), (2024, 2, 29)); // leap year
    }

    #[test]
    fn test_in_month_picks_most_recent_started() {
        let now = at(2024, 11, 25);
        let (start, end) = detect_temporal_range("what happened in June", now).expect("range");
        assert_eq!(date_of(start), (2024, 6, 1));
        assert_eq!(date_of(end), (2024, 6, 30));

        // December 2024 has not started yet on Nov 25
        let (start, _) = detect_temporal_range("in December", now).expect("range");
        assert_eq!(date_of(start), (2023, 12, 1));
    }

    #[test]
    fn test_last_month_is_strictly_before_current() {
        let now = at(2024, 6, 10);
        let (start, _) = detect_temporal_range("last June", now).expect("range");
        assert_eq!(date_of(start), (2023, 6, 1));

        let (start, _) = detect_temporal_range("last May", now).expect("range");
        assert_eq!(date_of(start), (2024, 5, 1));
    }

    #[test]
    fn test_between_months() {
        let now = at(2024, 11, 25);
        let (start, end) =
            detect_temporal_range("between March and May", now).expect("range");
        assert_eq!(date_of(start), (2024, 3, 1));
        assert_eq!(date_of(end), (2024, 5, 31));

        let (start, end) =
            detect_temporal_range("between March and May 2023", now).expect("range");
        assert_eq!(date_of(start), (2023, 3, 1));
        assert_eq!(date_of(end), (2023, 5, 31));
    }

    #[test]
    fn test_inverted_between_is_ambiguous() {
        let now = at(2024, 11, 25);
        assert_eq!(detect_temporal_range("between May and March", now), None);
    }

    #[test]
    fn test_month_year_and_bare_year() {
        let now = at(2024, 11, 25);
        let (start, end) = detect_temporal_range("June 2022", now).expect("range");
        assert_eq!(date_of(start), (2022, 6, 1));
        assert_eq!(date_of(end), (2022, 6, 30));

        let (start, end) = detect_temporal_range("back in 2023", now).expect("range");
        assert_eq!(date_of(start), (2023, 1, 1));
        assert_eq!(date_of(end), (2023, 12, 31));
    }

    #[test]
    fn test_no_temporal_cue_yields_none() {
        let now = at(2024, 11, 25);
        assert_eq!(detect_temporal_range("Where does Alice work?", now), None);
        // Modal "may" is not a month reference
        assert_eq!(detect_temporal_range("it may rain tomorrow", now), None);
        // Bare season without qualifier is ambiguous
        assert_eq!(
            detect_temporal_range("the spring framework is popular", now),
            None
        );
    }

    #[test]
    fn test_detection_is_pure() {
        let now = at(2024, 11, 25);
        let a = detect_temporal_range("what did I do last summer", now);
        let b = detect_temporal_range("what did I do last summer", now);
        assert_eq!(a, b);
        assert!(a.is_some());
    }

    #[test]
    fn test_season_with_explicit_year() {
        let now = at(2024, 11, 25);
        let (start, end) = detect_temporal_range("summer 2022", now).expect("range");
        assert_eq!(date_of(start), (2022, 6, 1));
        assert_eq!(date_of(end), (2022, 8, 31));
    }
}
