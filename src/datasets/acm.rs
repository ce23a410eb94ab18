use super::metapath::Metapath;
use super::schema::DatasetSchema;

/// ACM: papers labelled by area, linked to authors and subjects.
pub fn schema() -> DatasetSchema {
    DatasetSchema::new(
        "acm",
        "paper",
        &["paper", "author", "subject"],
        vec![
            Metapath::new(
                "PAP",
                &[("paper", "pa", "author"), ("author", "ap", "paper")],
            ),
            Metapath::new(
                "PSP",
                &[("paper", "ps", "subject"), ("subject", "sp", "paper")],
            ),
        ],
        &[("author", "ap", "paper"), ("subject", "sp", "paper")],
    )
}
