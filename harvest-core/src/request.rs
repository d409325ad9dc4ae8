use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid date for {field}: {value} (expected YYYY-MM-DD)")]
    InvalidDate { field: &'static str, value: String },
    #[error("start_date {start} is after end_date {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
}

/// Raw wire shape of a harvest request; every field may be absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HarvestRequestPayload {
    pub destination: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// A validated harvest request. Only this type can start a browser session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvestRequest {
    destination: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
}

impl HarvestRequest {
    pub fn new(destination: &str, start_date: &str, end_date: &str) -> Result<Self, RequestError> {
        HarvestRequestPayload {
            destination: Some(destination.to_string()),
            start_date: Some(start_date.to_string()),
            end_date: Some(end_date.to_string()),
        }
        .validate()
    }

    pub fn from_json(raw: &str) -> Result<Self, RequestError> {
        let payload: HarvestRequestPayload = serde_json::from_str(raw)
            .map_err(|err| RequestError::InvalidPayload(err.to_string()))?;
        payload.validate()
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    /// Value typed into the portal's "Start date" input.
    pub fn start_bound(&self) -> String {
        format!("{} 00:00", self.start_date.format(DATE_FORMAT))
    }

    /// Value typed into the portal's "End date" input.
    pub fn end_bound(&self) -> String {
        format!("{} 23:59", self.end_date.format(DATE_FORMAT))
    }
}

impl fmt::Display for HarvestRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} .. {}]",
            self.destination, self.start_date, self.end_date
        )
    }
}

impl HarvestRequestPayload {
    pub fn validate(self) -> Result<HarvestRequest, RequestError> {
        let destination = required("destination", self.destination)?;
        let start_raw = required("start_date", self.start_date)?;
        let end_raw = required("end_date", self.end_date)?;
        let start_date = parse_date("start_date", &start_raw)?;
        let end_date = parse_date("end_date", &end_raw)?;
        if start_date > end_date {
            return Err(RequestError::InvertedRange {
                start: start_date,
                end: end_date,
            });
        }
        Ok(HarvestRequest {
            destination,
            start_date,
            end_date,
        })
    }
}

fn required(field: &'static str, value: Option<String>) -> Result<String, RequestError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(RequestError::MissingField(field))
}

fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, RequestError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| RequestError::InvalidDate {
        field,
        value: value.to_string(),
    })
}
