//! R-style model formulas
//!
//! `price ~ .` selects every column except the label, `price ~ rooms + area`
//! selects explicit columns, `- col` removes a column and `a:b` adds the
//! product of two numeric columns. String columns are expanded into one-hot
//! indicators with the least frequent category dropped.

use crate::error::{DeployError, Result};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Right-hand side term of a formula
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Term {
    /// `.`: all non-label columns
    All,
    Column(String),
    Interaction(Vec<String>),
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::All => write!(f, "."),
            Term::Column(c) => write!(f, "{}", c),
            Term::Interaction(cols) => write!(f, "{}", cols.join(":")),
        }
    }
}

/// Parsed, unfitted formula
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaSpec {
    pub label: String,
    pub terms: Vec<Term>,
    pub removed: Vec<String>,
}

impl FormulaSpec {
    /// Parse `label ~ term (+|- term)*`
    pub fn parse(text: &str) -> Result<Self> {
        let (lhs, rhs) = text
            .split_once('~')
            .ok_or_else(|| DeployError::FormulaError(format!("Missing '~' in formula '{}'", text)))?;
        if rhs.contains('~') {
            return Err(DeployError::FormulaError(format!("More than one '~' in formula '{}'", text)));
        }

        let label = lhs.trim();
        if label.is_empty() || label.contains(char::is_whitespace) {
            return Err(DeployError::FormulaError(format!("Invalid label '{}'", label)));
        }

        let mut terms = Vec::new();
        let mut removed = Vec::new();
        for (negated, raw) in split_signed(rhs) {
            let token = raw.trim();
            if token.is_empty() {
                return Err(DeployError::FormulaError(format!("Empty term in formula '{}'", text)));
            }
            if token.contains(char::is_whitespace) {
                return Err(DeployError::FormulaError(format!("Unexpected whitespace in term '{}'", token)));
            }

            let term = if token == "." {
                Term::All
            } else if token.contains(':') {
                let cols: Vec<String> = token.split(':').map(str::to_string).collect();
                if cols.iter().any(|c| c.is_empty() || c == ".") {
                    return Err(DeployError::FormulaError(format!("Invalid interaction '{}'", token)));
                }
                Term::Interaction(cols)
            } else {
                Term::Column(token.to_string())
            };

            match (negated, term) {
                (false, term) => terms.push(term),
                (true, Term::Column(c)) => removed.push(c),
                (true, other) => {
                    return Err(DeployError::FormulaError(format!("Cannot remove term '{}'", other)));
                }
            }
        }

        if terms.is_empty() {
            return Err(DeployError::FormulaError(format!("No feature terms in formula '{}'", text)));
        }

        Ok(Self {
            label: label.to_string(),
            terms,
            removed,
        })
    }
}

impl FromStr for FormulaSpec {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for FormulaSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ~ ", self.label)?;
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, " + ")?;
            }
            write!(f, "{}", term)?;
        }
        for r in &self.removed {
            write!(f, " - {}", r)?;
        }
        Ok(())
    }
}

/// Split on top-level `+`/`-`, tagging each piece with whether it was negated
fn split_signed(rhs: &str) -> Vec<(bool, &str)> {
    let mut parts = Vec::new();
    let mut negated = false;
    let mut start = 0;
    for (i, c) in rhs.char_indices() {
        if c == '+' || c == '-' {
            let piece = &rhs[start..i];
            // A leading sign before the first term is not an empty term
            if !(parts.is_empty() && piece.trim().is_empty() && start == 0) {
                parts.push((negated, piece));
            }
            negated = c == '-';
            start = i + 1;
        }
    }
    parts.push((negated, &rhs[start..]));
    parts
}

/// How a referenced input column is encoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputKind {
    Numeric,
    /// Levels ordered by descending frequency; the last one is the dropped reference
    Categorical { levels: Vec<String> },
}

/// Input column the fitted formula reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputColumn {
    pub name: String,
    pub kind: InputKind,
}

/// One column of the design matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureTerm {
    Numeric { column: String },
    Indicator { column: String, level: String },
    Interaction { columns: Vec<String> },
}

impl FeatureTerm {
    pub fn name(&self) -> String {
        match self {
            FeatureTerm::Numeric { column } => column.clone(),
            FeatureTerm::Indicator { column, level } => format!("{}_{}", column, level),
            FeatureTerm::Interaction { columns } => columns.join(":"),
        }
    }
}

/// Formula fitted against a table: knows its input columns and encodings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedFormula {
    spec: FormulaSpec,
    inputs: Vec<InputColumn>,
    terms: Vec<FeatureTerm>,
}

impl FittedFormula {
    /// Resolve the formula against `df`
    pub fn fit(spec: &FormulaSpec, df: &DataFrame) -> Result<Self> {
        let label_col = df
            .column(&spec.label)
            .map_err(|_| DeployError::FeatureNotFound(spec.label.clone()))?;
        if !is_numeric_like(label_col.dtype()) {
            return Err(DeployError::FormulaError(format!(
                "Label '{}' must be numeric, got {}",
                spec.label,
                label_col.dtype()
            )));
        }

        for r in &spec.removed {
            if df.column(r).is_err() {
                return Err(DeployError::FeatureNotFound(r.clone()));
            }
        }

        let check_feature = |name: &str| -> Result<()> {
            if name == spec.label {
                return Err(DeployError::FormulaError(format!("Label '{}' cannot be a feature", name)));
            }
            if df.column(name).is_err() {
                return Err(DeployError::FeatureNotFound(name.to_string()));
            }
            Ok(())
        };

        // Expand `.` and drop removed columns, keeping first-mention order
        let mut selected: Vec<Term> = Vec::new();
        for term in &spec.terms {
            let expanded: Vec<Term> = match term {
                Term::All => df
                    .get_column_names()
                    .iter()
                    .map(|s| s.to_string())
                    .filter(|name| *name != spec.label)
                    .map(Term::Column)
                    .collect(),
                Term::Column(c) => {
                    check_feature(c)?;
                    vec![Term::Column(c.clone())]
                }
                Term::Interaction(cols) => {
                    for c in cols {
                        check_feature(c)?;
                    }
                    vec![Term::Interaction(cols.clone())]
                }
            };
            for t in expanded {
                let is_removed = matches!(&t, Term::Column(c) if spec.removed.contains(c));
                if !is_removed && !selected.contains(&t) {
                    selected.push(t);
                }
            }
        }

        let mut inputs: Vec<InputColumn> = Vec::new();
        let mut terms: Vec<FeatureTerm> = Vec::new();
        for term in &selected {
            let cols: Vec<&String> = match term {
                Term::Column(c) => vec![c],
                Term::Interaction(cols) => cols.iter().collect(),
                Term::All => continue,
            };
            for c in &cols {
                if !inputs.iter().any(|i| &i.name == *c) {
                    inputs.push(InputColumn {
                        name: (*c).clone(),
                        kind: infer_kind(df, c)?,
                    });
                }
            }

            match term {
                Term::Column(c) => {
                    match kind_of(&inputs, c)? {
                        InputKind::Numeric => terms.push(FeatureTerm::Numeric { column: c.clone() }),
                        InputKind::Categorical { levels } => {
                            let kept = levels.len().saturating_sub(1);
                            for level in &levels[..kept] {
                                terms.push(FeatureTerm::Indicator {
                                    column: c.clone(),
                                    level: level.clone(),
                                });
                            }
                        }
                    }
                }
                Term::Interaction(cols) => {
                    for c in cols {
                        if kind_of(&inputs, c)? != &InputKind::Numeric {
                            return Err(DeployError::FormulaError(format!(
                                "Interaction '{}' requires numeric columns, '{}' is categorical",
                                cols.join(":"),
                                c
                            )));
                        }
                    }
                    terms.push(FeatureTerm::Interaction { columns: cols.clone() });
                }
                Term::All => {}
            }
        }

        if terms.is_empty() {
            return Err(DeployError::FormulaError(format!("Formula '{}' selects no features", spec)));
        }

        Ok(Self {
            spec: spec.clone(),
            inputs,
            terms,
        })
    }

    pub fn spec(&self) -> &FormulaSpec {
        &self.spec
    }

    pub fn label(&self) -> &str {
        &self.spec.label
    }

    /// Columns a request table must provide
    pub fn inputs(&self) -> &[InputColumn] {
        &self.inputs
    }

    /// Names of the design matrix columns
    pub fn feature_names(&self) -> Vec<String> {
        self.terms.iter().map(FeatureTerm::name).collect()
    }

    /// Build the row-major design matrix for `df`
    pub fn design_matrix(&self, df: &DataFrame) -> Result<Array2<f64>> {
        let mut numeric: HashMap<&str, Vec<f64>> = HashMap::new();
        let mut categorical: HashMap<&str, Vec<usize>> = HashMap::new();

        for input in &self.inputs {
            match &input.kind {
                InputKind::Numeric => {
                    numeric.insert(&input.name, numeric_values(df, &input.name)?);
                }
                InputKind::Categorical { levels } => {
                    categorical.insert(&input.name, level_codes(df, &input.name, levels)?);
                }
            }
        }

        let col_data: Vec<Vec<f64>> = self
            .terms
            .iter()
            .map(|term| match term {
                FeatureTerm::Numeric { column } => numeric[column.as_str()].clone(),
                FeatureTerm::Indicator { column, level } => {
                    let levels = self.levels_of(column);
                    let target = levels.iter().position(|l| l == level).unwrap_or(usize::MAX);
                    categorical[column.as_str()]
                        .iter()
                        .map(|&code| if code == target { 1.0 } else { 0.0 })
                        .collect()
                }
                FeatureTerm::Interaction { columns } => {
                    let mut product = vec![1.0; df.height()];
                    for c in columns {
                        for (p, v) in product.iter_mut().zip(&numeric[c.as_str()]) {
                            *p *= v;
                        }
                    }
                    product
                }
            })
            .collect();

        let col_refs: Vec<&[f64]> = col_data.iter().map(|c| c.as_slice()).collect();
        Ok(Array2::from_shape_fn((df.height(), col_refs.len()), |(r, c)| col_refs[c][r]))
    }

    fn levels_of(&self, column: &str) -> &[String] {
        self.inputs
            .iter()
            .find_map(|i| match &i.kind {
                InputKind::Categorical { levels } if i.name == column => Some(levels.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }
}

/// Target values of `label` as f64; nulls, NaN and infinities are rejected
pub fn label_values(df: &DataFrame, label: &str) -> Result<Array1<f64>> {
    Ok(Array1::from_vec(numeric_values(df, label)?))
}

fn kind_of<'a>(inputs: &'a [InputColumn], name: &str) -> Result<&'a InputKind> {
    inputs
        .iter()
        .find(|i| i.name == name)
        .map(|i| &i.kind)
        .ok_or_else(|| DeployError::FeatureNotFound(name.to_string()))
}

fn is_numeric_like(dtype: &DataType) -> bool {
    dtype.is_primitive_numeric() || dtype == &DataType::Boolean
}

fn infer_kind(df: &DataFrame, name: &str) -> Result<InputKind> {
    let col = df.column(name).map_err(|_| DeployError::FeatureNotFound(name.to_string()))?;
    let dtype = col.dtype();
    if is_numeric_like(dtype) {
        return Ok(InputKind::Numeric);
    }
    if dtype != &DataType::String {
        return Err(DeployError::FormulaError(format!(
            "Column '{}' has unsupported type {}",
            name, dtype
        )));
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for value in col.str()?.into_iter() {
        let value = value.ok_or_else(|| {
            DeployError::InvalidInput(format!("Null value in categorical column '{}'", name))
        })?;
        *counts.entry(value.to_string()).or_insert(0) += 1;
    }
    let mut levels: Vec<(String, usize)> = counts.into_iter().collect();
    levels.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    Ok(InputKind::Categorical {
        levels: levels.into_iter().map(|(level, _)| level).collect(),
    })
}

fn numeric_values(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let col = df.column(name).map_err(|_| DeployError::FeatureNotFound(name.to_string()))?;
    if !is_numeric_like(col.dtype()) {
        return Err(DeployError::InvalidInput(format!(
            "Column '{}' must be numeric, got {}",
            name,
            col.dtype()
        )));
    }
    let as_f64 = col.cast(&DataType::Float64)?;
    as_f64
        .f64()?
        .into_iter()
        .enumerate()
        .map(|(row, v)| {
            let v = v.ok_or_else(|| {
                DeployError::InvalidInput(format!("Null value in column '{}' at row {}", name, row))
            })?;
            if !v.is_finite() {
                return Err(DeployError::InvalidInput(format!(
                    "Non-finite value {} in column '{}' at row {}",
                    v, name, row
                )));
            }
            Ok(v)
        })
        .collect()
}

fn level_codes(df: &DataFrame, name: &str, levels: &[String]) -> Result<Vec<usize>> {
    let col = df.column(name).map_err(|_| DeployError::FeatureNotFound(name.to_string()))?;
    let values = col.str().map_err(|_| {
        DeployError::InvalidInput(format!("Column '{}' must be a string column, got {}", name, col.dtype()))
    })?;
    values
        .into_iter()
        .enumerate()
        .map(|(row, v)| {
            let v = v.ok_or_else(|| {
                DeployError::InvalidInput(format!("Null value in column '{}' at row {}", name, row))
            })?;
            levels
                .iter()
                .position(|l| l == v)
                .ok_or_else(|| DeployError::InvalidInput(format!("Unseen category '{}' in column '{}'", v, name)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn housing() -> DataFrame {
        df!(
            "rooms" => &[3i32, 2, 4, 3, 5],
            "area" => &[120.0, 80.0, 150.0, 110.0, 200.0],
            "city" => &["oslo", "bergen", "oslo", "oslo", "bergen"],
            "price" => &[250.0, 180.0, 320.0, 240.0, 400.0]
        )
        .unwrap()
    }

    #[test]
    fn test_parse_dot() {
        let spec = FormulaSpec::parse("price ~ .").unwrap();
        assert_eq!(spec.label, "price");
        assert_eq!(spec.terms, vec![Term::All]);
        assert!(spec.removed.is_empty());
    }

    #[test]
    fn test_parse_terms_and_removal() {
        let spec = FormulaSpec::parse(" price ~ . - city + rooms:area ").unwrap();
        assert_eq!(spec.terms, vec![Term::All, Term::Interaction(vec!["rooms".into(), "area".into()])]);
        assert_eq!(spec.removed, vec!["city".to_string()]);
        assert_eq!(spec.to_string(), "price ~ . + rooms:area - city");
    }

    #[test]
    fn test_parse_errors() {
        assert!(FormulaSpec::parse("price").is_err());
        assert!(FormulaSpec::parse("~ rooms").is_err());
        assert!(FormulaSpec::parse("price ~ rooms + ").is_err());
        assert!(FormulaSpec::parse("price ~ - rooms").is_err());
        assert!(FormulaSpec::parse("a ~ b ~ c").is_err());
    }

    #[test]
    fn test_fit_dot_expands_categoricals() {
        let spec = FormulaSpec::parse("price ~ .").unwrap();
        let fitted = FittedFormula::fit(&spec, &housing()).unwrap();
        // oslo (3) is more frequent than bergen (2); bergen is the dropped reference
        assert_eq!(fitted.feature_names(), vec!["rooms", "area", "city_oslo"]);
        assert_eq!(fitted.inputs().len(), 3);

        let x = fitted.design_matrix(&housing()).unwrap();
        assert_eq!(x.shape(), &[5, 3]);
        assert_eq!(x[[0, 2]], 1.0);
        assert_eq!(x[[1, 2]], 0.0);
    }

    #[test]
    fn test_fit_removal_and_interaction() {
        let spec = FormulaSpec::parse("price ~ . - city + rooms:area").unwrap();
        let fitted = FittedFormula::fit(&spec, &housing()).unwrap();
        assert_eq!(fitted.feature_names(), vec!["rooms", "area", "rooms:area"]);

        let x = fitted.design_matrix(&housing()).unwrap();
        assert_eq!(x[[0, 2]], 3.0 * 120.0);
    }

    #[test]
    fn test_fit_unknown_column() {
        let spec = FormulaSpec::parse("price ~ rooms + garden").unwrap();
        let result = FittedFormula::fit(&spec, &housing());
        assert!(matches!(result, Err(DeployError::FeatureNotFound(c)) if c == "garden"));
    }

    #[test]
    fn test_interaction_rejects_categorical() {
        let spec = FormulaSpec::parse("price ~ rooms:city").unwrap();
        assert!(matches!(
            FittedFormula::fit(&spec, &housing()),
            Err(DeployError::FormulaError(_))
        ));
    }

    #[test]
    fn test_design_matrix_missing_column() {
        let spec = FormulaSpec::parse("price ~ rooms + area").unwrap();
        let fitted = FittedFormula::fit(&spec, &housing()).unwrap();
        let request = df!("rooms" => &[3i32]).unwrap();
        assert!(matches!(
            fitted.design_matrix(&request),
            Err(DeployError::FeatureNotFound(c)) if c == "area"
        ));
    }

    #[test]
    fn test_design_matrix_unseen_category() {
        let spec = FormulaSpec::parse("price ~ city").unwrap();
        let fitted = FittedFormula::fit(&spec, &housing()).unwrap();
        let request = df!("city" => &["trondheim"]).unwrap();
        assert!(matches!(fitted.design_matrix(&request), Err(DeployError::InvalidInput(_))));
    }

    #[test]
    fn test_design_matrix_null_feature() {
        let spec = FormulaSpec::parse("price ~ area").unwrap();
        let fitted = FittedFormula::fit(&spec, &housing()).unwrap();
        let request = df!("area" => &[Some(1.0), None]).unwrap();
        assert!(matches!(fitted.design_matrix(&request), Err(DeployError::InvalidInput(_))));
    }

    #[test]
    fn test_label_values() {
        let y = label_values(&housing(), "price").unwrap();
        assert_eq!(y.len(), 5);
        assert_eq!(y[4], 400.0);
    }
}
