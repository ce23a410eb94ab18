use super::metapath::Metapath;
use super::schema::DatasetSchema;

/// DBLP four-area: authors labelled by research area, linked through papers
/// to terms and conferences. Conference nodes carry no features.
pub fn schema() -> DatasetSchema {
    DatasetSchema::new(
        "dblp",
        "author",
        &["author", "paper", "term", "conference"],
        vec![
            Metapath::new(
                "APA",
                &[("author", "ap", "paper"), ("paper", "pa", "author")],
            ),
            Metapath::new(
                "APTPA",
                &[
                    ("author", "ap", "paper"),
                    ("paper", "pt", "term"),
                    ("term", "tp", "paper"),
                    ("paper", "pa", "author"),
                ],
            ),
            Metapath::new(
                "APCPA",
                &[
                    ("author", "ap", "paper"),
                    ("paper", "pc", "conference"),
                    ("conference", "cp", "paper"),
                    ("paper", "pa", "author"),
                ],
            ),
        ],
        &[("paper", "pa", "author")],
    )
}
