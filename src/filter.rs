use std::borrow::Borrow;

use regex::{Regex, RegexBuilder};

use crate::domain::DatasetRecord;
use crate::error::SyncError;

/// Case-insensitive keyword matcher over catalog records.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    regex: Regex,
}

impl KeywordFilter {
    pub fn new(pattern: &str) -> Result<Self, SyncError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|err| SyncError::InvalidPattern(err.to_string()))?;
        Ok(Self { regex })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    pub fn matches(&self, record: &DatasetRecord) -> bool {
        record
            .keywords
            .iter()
            .any(|keyword| self.regex.is_match(keyword))
    }

    /// Lazily yields matching records in input order.
    pub fn filter<'a, I>(&'a self, records: I) -> impl Iterator<Item = I::Item>
    where
        I: IntoIterator,
        I::Item: Borrow<DatasetRecord>,
    {
        records
            .into_iter()
            .filter(move |record| {
                self.matches(<I::Item as Borrow<DatasetRecord>>::borrow(record))
            })
    }
}
