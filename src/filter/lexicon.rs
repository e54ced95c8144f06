//! Keyword tables for the relevance filter.
//!
//! All entries are lowercase. Matching is done against lowercased,
//! whitespace-collapsed input, so multi-word phrases use single spaces.

use serde::{Deserialize, Serialize};

/// Academic subjects that fall outside the literature domain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Math,
    Science,
    Technology,
    Other,
}

impl Category {
    /// Declaration order. Ties between categories go to the earliest entry.
    pub const ALL: [Category; 4] = [
        Category::Math,
        Category::Science,
        Category::Technology,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Math => "math",
            Category::Science => "science",
            Category::Technology => "technology",
            Category::Other => "other",
        }
    }

    /// Human-facing subject name used in user messages.
    pub fn label(self) -> &'static str {
        match self {
            Category::Math => "math",
            Category::Science => "science",
            Category::Technology => "technology",
            Category::Other => "other academic subjects",
        }
    }

    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Category::Math => MATH,
            Category::Science => SCIENCE,
            Category::Technology => TECHNOLOGY,
            Category::Other => OTHER,
        }
    }
}

// "pi" also matches inside words such as "spinning" and "pirate" under substring matching.
const MATH: &[&str] = &[
    "algebra",
    "calculus",
    "derivative",
    "integral",
    "equation",
    "polynomial",
    "quadratic",
    "geometry",
    "trigonometry",
    "logarithm",
    "exponent",
    "matrix",
    "matrices",
    "theorem",
    "hypotenuse",
    "pythagorean",
    "fraction",
    "multiply",
    "multiplication",
    "divide",
    "arithmetic",
    "factorial",
    "probability",
    "percent",
    "perimeter",
    "circumference",
    "square root",
    "slope",
    "coefficient",
    "pi",
];

const SCIENCE: &[&str] = &[
    "photosynthesis",
    "biology",
    "chemistry",
    "physics",
    "cell",
    "molecule",
    "atom",
    "electron",
    "proton",
    "neutron",
    "dna",
    "genetic",
    "mitochondria",
    "periodic table",
    "chemical",
    "gravity",
    "velocity",
    "acceleration",
    "organism",
    "bacteria",
    "respiration",
    "osmosis",
    "ecosystem",
    "natural selection",
    "astronomy",
    "geology",
    "hypothesis",
    "scientific method",
];

const TECHNOLOGY: &[&str] = &[
    "computer",
    "programming",
    "software",
    "hardware",
    "algorithm",
    "javascript",
    "python",
    "html",
    "database",
    "coding",
    "internet",
    "website",
    "smartphone",
    "artificial intelligence",
    "machine learning",
    "robot",
    "binary",
    "processor",
    "spreadsheet",
    "operating system",
];

const OTHER: &[&str] = &[
    "economics",
    "economy",
    "supply and demand",
    "geography",
    "capital of",
    "world war",
    "civil war",
    "government",
    "constitution",
    "stock market",
    "inflation",
    "psychology",
    "sociology",
    "accounting",
    "translate",
    "spanish",
    "latitude",
    "longitude",
    "continent",
];

/// Literature allowlist. Includes plot vocabulary from the novel and the
/// mock-trial framing so that in-world violence or devices do not read as
/// off-topic.
pub const LITERATURE: &[&str] = &[
    // the novel
    "princess bride",
    "buttercup",
    "westley",
    "inigo",
    "montoya",
    "fezzik",
    "vizzini",
    "humperdinck",
    "rugen",
    "miracle max",
    "valerie",
    "florin",
    "guilder",
    "dread pirate",
    "six-fingered",
    "six fingered",
    "iocane",
    "fire swamp",
    "cliffs of insanity",
    "pit of despair",
    "rodents of unusual size",
    "true love",
    "machine",
    "goldman",
    "morgenstern",
    // plot vocabulary
    "murder",
    "poison",
    "fight",
    "sword",
    "duel",
    "death",
    "kill",
    "fire",
    "revenge",
    "wedding",
    "kidnap",
    "giant",
    "pirate",
    "castle",
    // literary analysis
    "character",
    "story",
    "plot",
    "theme",
    "novel",
    "book",
    "chapter",
    "author",
    "narrator",
    "protagonist",
    "antagonist",
    "villain",
    "hero",
    "motive",
    "symbol",
    "metaphor",
    "irony",
    "foreshadow",
    "scene",
    "dialogue",
    "quote",
    "literature",
    "fiction",
    // mock trial
    "trial",
    "testimony",
    "testify",
    "witness",
    "defendant",
    "prosecution",
    "jury",
    "verdict",
    "guilty",
    "innocent",
    "alibi",
    "evidence",
    "cross-examination",
];
