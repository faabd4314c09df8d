mod rule_table;

pub use rule_table::{
    MatchColumns, RuleTableParser, HEADER, MATCH_COLUMNS_COLUMN, WILDCARD_COLUMN,
};
