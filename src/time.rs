use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};

const PDF_FORMAT: &str = "%Y-%m-%d";
const DISPLAY_FORMAT: &str = "%d/%m/%Y";

pub(crate) fn parse_pdf_date(raw: &str) -> std::result::Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(raw.trim(), PDF_FORMAT)
}

pub(crate) fn parse_display_date(raw: &str) -> std::result::Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(raw.trim(), DISPLAY_FORMAT)
}

pub(crate) fn format_date(date: &NaiveDate) -> String {
    date.format(DISPLAY_FORMAT).to_string()
}

// deserialize function for reading dates in the DD/MM/YYYY display format
pub(crate) fn deserialize_display_date<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<NaiveDate, D::Error> {
    let raw = String::deserialize(d)?;
    parse_display_date(&raw).map_err(serde::de::Error::custom)
}
