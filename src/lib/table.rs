use crate::crosstab::OutcomeRow;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use log::debug;

/// String labels stored once, with one integer code per value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Categorical {
    levels: Vec<String>,
    codes: Vec<u32>,
    index: HashMap<String, u32>,
}

impl Categorical {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_levels(levels: Vec<String>) -> Self {
        let index = levels
            .iter()
            .enumerate()
            .map(|(i, level)| (level.clone(), i as u32))
            .collect();
        Self {
            levels,
            codes: Vec::new(),
            index,
        }
    }

    /// Appends one value, registering a new level on first sight.
    pub fn push(&mut self, label: &str) -> u32 {
        let code = self.level_code(label);
        self.codes.push(code);
        code
    }

    fn level_code(&mut self, label: &str) -> u32 {
        if let Some(&code) = self.index.get(label) {
            return code;
        }
        let code = self.levels.len() as u32;
        self.levels.push(label.to_string());
        self.index.insert(label.to_string(), code);
        code
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn codes(&self) -> &[u32] {
        &self.codes
    }

    pub fn label(&self, code: u32) -> Option<&str> {
        self.levels.get(code as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Appends the values of `other`, translating its codes into this
    /// categorical's levels. Levels not seen yet are registered.
    pub fn extend_from(&mut self, other: &Categorical) {
        let mapping: Vec<u32> = other
            .levels
            .iter()
            .map(|level| self.level_code(level))
            .collect();
        self.codes
            .extend(other.codes.iter().map(|&c| mapping[c as usize]));
    }
}

/// Order-stable union: levels of the first set, then unseen levels of the
/// next, and so on.
pub fn union_levels<'a, I>(level_sets: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a [String]>,
{
    let mut seen: HashSet<&str> = HashSet::new();
    let mut union = Vec::new();
    for levels in level_sets {
        for level in levels {
            if seen.insert(level.as_str()) {
                union.push(level.clone());
            }
        }
    }
    union
}

/// Outcomes read from one slice of the input, with chunk-local levels.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutcomeChunk {
    pub outcomes: Vec<bool>,
    pub rows: Categorical,
    pub columns: Categorical,
}

impl OutcomeChunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, outcome: bool, row: &str, column: &str) {
        self.outcomes.push(outcome);
        self.rows.push(row);
        self.columns.push(column);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Concatenated chunks sharing one set of row and column levels.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutcomeTable {
    outcomes: Vec<bool>,
    rows: Categorical,
    columns: Categorical,
}

impl OutcomeTable {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn row_levels(&self) -> &[String] {
        self.rows.levels()
    }

    pub fn column_levels(&self) -> &[String] {
        self.columns.levels()
    }

    pub fn row_label(&self, code: u32) -> Option<&str> {
        self.rows.label(code)
    }

    pub fn column_label(&self, code: u32) -> Option<&str> {
        self.columns.label(code)
    }

    /// Rows keyed by level codes. Codes follow first appearance in the input.
    pub fn outcome_rows(&self) -> impl Iterator<Item = OutcomeRow<u32, u32>> + '_ {
        self.outcomes
            .iter()
            .zip(self.rows.codes().iter().zip(self.columns.codes().iter()))
            .map(|(&outcome, (&r, &c))| OutcomeRow::new(outcome, r, c))
    }
}

/// Recodes every chunk against the union of all chunk levels and
/// concatenates them.
pub fn stack_chunks(chunks: &[OutcomeChunk]) -> OutcomeTable {
    let row_levels = union_levels(chunks.iter().map(|c| c.rows.levels()));
    let column_levels = union_levels(chunks.iter().map(|c| c.columns.levels()));
    debug!(
        "Stacking {} chunks with {} row levels and {} column levels",
        chunks.len(),
        row_levels.len(),
        column_levels.len()
    );

    let mut table = OutcomeTable {
        outcomes: Vec::with_capacity(chunks.iter().map(OutcomeChunk::len).sum()),
        rows: Categorical::from_levels(row_levels),
        columns: Categorical::from_levels(column_levels),
    };
    for chunk in chunks {
        table.outcomes.extend_from_slice(&chunk.outcomes);
        table.rows.extend_from(&chunk.rows);
        table.columns.extend_from(&chunk.columns);
    }
    debug_assert_eq!(table.outcomes.len(), table.rows.len());
    debug_assert_eq!(table.outcomes.len(), table.columns.len());
    table
}
