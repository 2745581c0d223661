mod extractor;

pub use extractor::{count_pages, extract_range, strip_restrictions};

#[cfg(test)]
pub(crate) use extractor::test_support;
