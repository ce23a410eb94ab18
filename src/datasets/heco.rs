//! The four benchmark graphs preprocessed by HeCo
//! (https://arxiv.org/abs/2105.09111).
use super::metapath::Metapath;
use super::schema::DatasetSchema;

pub fn acm_schema() -> DatasetSchema {
    DatasetSchema::new(
        "heco_acm",
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
        &[("author", "ap", "paper")],
    )
}

pub fn dblp_schema() -> DatasetSchema {
    DatasetSchema::new(
        "heco_dblp",
        "author",
        &["author", "paper", "conference", "term"],
        vec![
            Metapath::new(
                "APA",
                &[("author", "ap", "paper"), ("paper", "pa", "author")],
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
            Metapath::new(
                "APTPA",
                &[
                    ("author", "ap", "paper"),
                    ("paper", "pt", "term"),
                    ("term", "tp", "paper"),
                    ("paper", "pa", "author"),
                ],
            ),
        ],
        &[("paper", "pa", "author")],
    )
}

/// Freebase movies; none of the node types carry features.
pub fn freebase_schema() -> DatasetSchema {
    DatasetSchema::new(
        "heco_freebase",
        "movie",
        &["movie", "author", "director", "writer"],
        vec![
            Metapath::new(
                "MAM",
                &[("movie", "ma", "author"), ("author", "am", "movie")],
            ),
            Metapath::new(
                "MDM",
                &[("movie", "md", "director"), ("director", "dm", "movie")],
            ),
            Metapath::new(
                "MWM",
                &[("movie", "mw", "writer"), ("writer", "wm", "movie")],
            ),
        ],
        &[
            ("author", "am", "movie"),
            ("director", "dm", "movie"),
            ("writer", "wm", "movie"),
        ],
    )
}

pub fn aminer_schema() -> DatasetSchema {
    DatasetSchema::new(
        "heco_aminer",
        "paper",
        &["paper", "author", "reference"],
        vec![
            Metapath::new(
                "PAP",
                &[("paper", "pa", "author"), ("author", "ap", "paper")],
            ),
            Metapath::new(
                "PRP",
                &[("paper", "pr", "reference"), ("reference", "rp", "paper")],
            ),
        ],
        &[("paper", "pa", "author"), ("paper", "pr", "reference")],
    )
}
