//! Operator types for data-flow query plans, shared by the merger, the
//! matcher and the rewrite engine.
//!
//! An operator is one relational step of a compiled script. Its parameters
//! use positional column references (`Expression::Column`) into the output
//! of its predecessors; names carried in `output_schema` are display only
//! and never take part in structural comparison.

use crate::error::{EqualityError, EqualityResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// Expression Types
/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Comparison operators used in filter predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
}

/// Scalar expression evaluated per input row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// Reference to input column by index
    Column(usize),
    /// Reference to a column by name that the compiler failed to bind.
    ///
    /// Plans handed over by the compiler should not contain these, but
    /// comparing an operator that does is an error, not a match.
    Named(String),
    /// Integer constant
    Int(i64),
    /// Float constant
    Float(f64),
    /// String constant
    Str(String),
    /// Boolean constant
    Bool(bool),
    /// Arithmetic binary operation
    Arithmetic {
        op: ArithOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// Call of a named (built-in or user) function
    Call {
        function: String,
        args: Vec<Expression>,
    },
}

impl Expression {
    /// Returns the column index if this is a plain column reference
    pub fn as_column(&self) -> Option<usize> {
        match self {
            Expression::Column(idx) => Some(*idx),
            _ => None,
        }
    }

    fn check_resolved(&self) -> EqualityResult<()> {
        match self {
            Expression::Named(name) => Err(EqualityError::UnresolvedColumn(name.clone())),
            Expression::Arithmetic { left, right, .. } => {
                left.check_resolved()?;
                right.check_resolved()
            }
            Expression::Call { args, .. } => args.iter().try_for_each(Expression::check_resolved),
            Expression::Column(_)
            | Expression::Int(_)
            | Expression::Float(_)
            | Expression::Str(_)
            | Expression::Bool(_) => Ok(()),
        }
    }

    /// Structural comparison. Floats compare by bit pattern so that a NaN
    /// constant is equal to itself.
    fn same_as(&self, other: &Expression) -> bool {
        match (self, other) {
            (Expression::Float(a), Expression::Float(b)) => a.to_bits() == b.to_bits(),
            (
                Expression::Arithmetic { op, left, right },
                Expression::Arithmetic {
                    op: op2,
                    left: left2,
                    right: right2,
                },
            ) => op == op2 && left.same_as(left2) && right.same_as(right2),
            (
                Expression::Call { function, args },
                Expression::Call {
                    function: function2,
                    args: args2,
                },
            ) => {
                function == function2
                    && args.len() == args2.len()
                    && args.iter().zip(args2).all(|(a, b)| a.same_as(b))
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Column(idx) => write!(f, "${idx}"),
            Expression::Named(name) => write!(f, "{name}?"),
            Expression::Int(v) => write!(f, "{v}"),
            Expression::Float(v) => write!(f, "{v}"),
            Expression::Str(s) => write!(f, "'{s}'"),
            Expression::Bool(b) => write!(f, "{b}"),
            Expression::Arithmetic { op, left, right } => {
                let sym = match op {
                    ArithOp::Add => "+",
                    ArithOp::Sub => "-",
                    ArithOp::Mul => "*",
                    ArithOp::Div => "/",
                    ArithOp::Mod => "%",
                };
                write!(f, "({left} {sym} {right})")
            }
            Expression::Call { function, args } => {
                let args: Vec<String> = args.iter().map(ToString::to_string).collect();
                write!(f, "{function}({})", args.join(", "))
            }
        }
    }
}

// Predicate Types
/// Predicate for Filter operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Binary comparison of two expressions
    Compare {
        left: Expression,
        op: ComparisonOp,
        right: Expression,
    },
    /// Expression is null
    IsNull(Expression),
    /// Logical AND
    And(Box<Predicate>, Box<Predicate>),
    /// Logical OR
    Or(Box<Predicate>, Box<Predicate>),
    /// Logical NOT
    Not(Box<Predicate>),
    /// Always true
    True,
    /// Always false
    False,
}

impl Predicate {
    /// Build a comparison predicate
    pub fn compare(left: Expression, op: ComparisonOp, right: Expression) -> Self {
        Predicate::Compare { left, op, right }
    }

    /// Build a conjunction
    pub fn and(left: Predicate, right: Predicate) -> Self {
        Predicate::And(Box::new(left), Box::new(right))
    }

    /// Build a disjunction
    pub fn or(left: Predicate, right: Predicate) -> Self {
        Predicate::Or(Box::new(left), Box::new(right))
    }

    fn check_resolved(&self) -> EqualityResult<()> {
        match self {
            Predicate::Compare { left, right, .. } => {
                left.check_resolved()?;
                right.check_resolved()
            }
            Predicate::IsNull(expr) => expr.check_resolved(),
            Predicate::And(l, r) | Predicate::Or(l, r) => {
                l.check_resolved()?;
                r.check_resolved()
            }
            Predicate::Not(inner) => inner.check_resolved(),
            Predicate::True | Predicate::False => Ok(()),
        }
    }

    /// Purely syntactic: `a AND b` and `b AND a` are different predicates.
    fn same_as(&self, other: &Predicate) -> bool {
        match (self, other) {
            (
                Predicate::Compare { left, op, right },
                Predicate::Compare {
                    left: left2,
                    op: op2,
                    right: right2,
                },
            ) => op == op2 && left.same_as(left2) && right.same_as(right2),
            (Predicate::IsNull(a), Predicate::IsNull(b)) => a.same_as(b),
            (Predicate::And(a1, b1), Predicate::And(a2, b2))
            | (Predicate::Or(a1, b1), Predicate::Or(a2, b2)) => a1.same_as(a2) && b1.same_as(b2),
            (Predicate::Not(a), Predicate::Not(b)) => a.same_as(b),
            (Predicate::True, Predicate::True) | (Predicate::False, Predicate::False) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare { left, op, right } => {
                let sym = match op {
                    ComparisonOp::Equal => "==",
                    ComparisonOp::NotEqual => "!=",
                    ComparisonOp::LessThan => "<",
                    ComparisonOp::LessOrEqual => "<=",
                    ComparisonOp::GreaterThan => ">",
                    ComparisonOp::GreaterOrEqual => ">=",
                };
                write!(f, "{left} {sym} {right}")
            }
            Predicate::IsNull(expr) => write!(f, "{expr} is null"),
            Predicate::And(l, r) => write!(f, "({l} and {r})"),
            Predicate::Or(l, r) => write!(f, "({l} or {r})"),
            Predicate::Not(inner) => write!(f, "not {inner}"),
            Predicate::True => write!(f, "true"),
            Predicate::False => write!(f, "false"),
        }
    }
}

/// One output column of a Generate operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateItem {
    pub expr: Expression,
    /// Unnest a bag/tuple valued expression into the output row
    pub flatten: bool,
}

impl GenerateItem {
    pub fn column(idx: usize) -> Self {
        GenerateItem {
            expr: Expression::Column(idx),
            flatten: false,
        }
    }
}

/// Step of a nested block inside a Generate operator, applied to a
/// bag-valued input column before the generate items are evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NestedStep {
    Filter { bag: usize, predicate: Predicate },
    Distinct { bag: usize },
    Limit { bag: usize, count: u64 },
    Sort { bag: usize, keys: Vec<SortKey> },
}

impl NestedStep {
    /// Like `==`, but nested predicates compare float constants bitwise
    fn same_as(&self, other: &NestedStep) -> bool {
        match (self, other) {
            (
                NestedStep::Filter { bag, predicate },
                NestedStep::Filter {
                    bag: bag2,
                    predicate: predicate2,
                },
            ) => bag == bag2 && predicate.same_as(predicate2),
            _ => self == other,
        }
    }
}

/// Sort key: column index and direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub column: usize,
    pub descending: bool,
}

// Operator Types
/// Kind-specific parameters of an operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperatorKind {
    /// Read a data set
    Load {
        /// Location the data is read from
        path: String,
        /// Column names of the loaded relation
        schema: Vec<String>,
    },

    /// Keep rows satisfying a predicate
    Filter { predicate: Predicate },

    /// Per-row projection/transformation (foreach ... generate)
    Generate {
        /// Optional nested block evaluated before the items
        nested: Vec<NestedStep>,
        /// Generated columns
        items: Vec<GenerateItem>,
        /// Output column names
        output_schema: Vec<String>,
    },

    /// Equi-join; `keys[i]` are the key columns of the i-th input
    Join {
        keys: Vec<Vec<usize>>,
        output_schema: Vec<String>,
    },

    /// Co-group; `keys[i]` are the grouping columns of the i-th input
    Group {
        keys: Vec<Vec<usize>>,
        output_schema: Vec<String>,
    },

    /// Concatenate inputs
    Union,

    /// Remove duplicate rows
    Distinct,

    /// Order rows
    Sort { keys: Vec<SortKey> },

    /// Keep the first `count` rows
    Limit { count: u64 },

    /// Write the input to a location
    Store { path: String },
}

/// Discriminant of [`OperatorKind`], used by rules to target one kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperatorTag {
    Load,
    Filter,
    Generate,
    Join,
    Group,
    Union,
    Distinct,
    Sort,
    Limit,
    Store,
}

impl OperatorKind {
    pub fn tag(&self) -> OperatorTag {
        match self {
            OperatorKind::Load { .. } => OperatorTag::Load,
            OperatorKind::Filter { .. } => OperatorTag::Filter,
            OperatorKind::Generate { .. } => OperatorTag::Generate,
            OperatorKind::Join { .. } => OperatorTag::Join,
            OperatorKind::Group { .. } => OperatorTag::Group,
            OperatorKind::Union => OperatorTag::Union,
            OperatorKind::Distinct => OperatorTag::Distinct,
            OperatorKind::Sort { .. } => OperatorTag::Sort,
            OperatorKind::Limit { .. } => OperatorTag::Limit,
            OperatorKind::Store { .. } => OperatorTag::Store,
        }
    }

    /// Build a pure projection selecting `columns` in order
    pub fn projection(columns: &[usize], output_schema: Vec<String>) -> Self {
        OperatorKind::Generate {
            nested: Vec::new(),
            items: columns.iter().map(|&c| GenerateItem::column(c)).collect(),
            output_schema,
        }
    }

    /// Column indices selected by a pure projection.
    ///
    /// A Generate is a pure projection when it only forwards input columns:
    /// no nested block, no flatten and no computed expressions.
    pub fn projected_columns(&self) -> Option<Vec<usize>> {
        match self {
            OperatorKind::Generate { nested, items, .. } if nested.is_empty() => items
                .iter()
                .map(|item| {
                    if item.flatten {
                        None
                    } else {
                        item.expr.as_column()
                    }
                })
                .collect(),
            _ => None,
        }
    }

    /// Check if this operator is a pure projection
    pub fn is_pure_projection(&self) -> bool {
        self.projected_columns().is_some()
    }

    /// Output column names, when the operator defines its own
    pub fn declared_schema(&self) -> Option<&[String]> {
        match self {
            OperatorKind::Load { schema, .. } => Some(schema),
            OperatorKind::Generate { output_schema, .. }
            | OperatorKind::Join { output_schema, .. }
            | OperatorKind::Group { output_schema, .. } => Some(output_schema),
            _ => None,
        }
    }

    /// Structural comparison of kind-specific parameters.
    ///
    /// Output column names are ignored. Fails for ill-formed operators:
    /// unresolved column names anywhere in a predicate or expression, and
    /// join/group key lists of differing arity.
    pub fn params_equal(&self, other: &OperatorKind) -> EqualityResult<bool> {
        self.check_well_formed()?;
        other.check_well_formed()?;

        let equal = match (self, other) {
            (
                OperatorKind::Load { path, schema },
                OperatorKind::Load {
                    path: path2,
                    schema: schema2,
                },
            ) => path == path2 && schema.len() == schema2.len(),
            (OperatorKind::Filter { predicate }, OperatorKind::Filter { predicate: p2 }) => {
                predicate.same_as(p2)
            }
            (
                OperatorKind::Generate { nested, items, .. },
                OperatorKind::Generate {
                    nested: nested2,
                    items: items2,
                    ..
                },
            ) => {
                nested.len() == nested2.len()
                    && nested.iter().zip(nested2).all(|(a, b)| a.same_as(b))
                    && items.len() == items2.len()
                    && items
                        .iter()
                        .zip(items2)
                        .all(|(a, b)| a.flatten == b.flatten && a.expr.same_as(&b.expr))
            }
            (OperatorKind::Join { keys, .. }, OperatorKind::Join { keys: keys2, .. })
            | (OperatorKind::Group { keys, .. }, OperatorKind::Group { keys: keys2, .. }) => {
                keys == keys2
            }
            (OperatorKind::Union, OperatorKind::Union)
            | (OperatorKind::Distinct, OperatorKind::Distinct) => true,
            (OperatorKind::Sort { keys }, OperatorKind::Sort { keys: keys2 }) => keys == keys2,
            (OperatorKind::Limit { count }, OperatorKind::Limit { count: count2 }) => {
                count == count2
            }
            (OperatorKind::Store { path }, OperatorKind::Store { path: path2 }) => path == path2,
            _ => false,
        };
        Ok(equal)
    }

    fn check_well_formed(&self) -> EqualityResult<()> {
        match self {
            OperatorKind::Filter { predicate } => predicate.check_resolved(),
            OperatorKind::Generate { nested, items, .. } => {
                for step in nested {
                    if let NestedStep::Filter { predicate, .. } = step {
                        predicate.check_resolved()?;
                    }
                }
                items.iter().try_for_each(|item| item.expr.check_resolved())
            }
            OperatorKind::Join { keys, .. } | OperatorKind::Group { keys, .. } => {
                if let Some(first) = keys.first() {
                    if keys.iter().any(|k| k.len() != first.len()) {
                        return Err(EqualityError::Malformed(format!(
                            "{} key lists differ in arity: {keys:?}",
                            self.tag()
                        )));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for OperatorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperatorTag::Load => "Load",
            OperatorTag::Filter => "Filter",
            OperatorTag::Generate => "Generate",
            OperatorTag::Join => "Join",
            OperatorTag::Group => "Group",
            OperatorTag::Union => "Union",
            OperatorTag::Distinct => "Distinct",
            OperatorTag::Sort => "Sort",
            OperatorTag::Limit => "Limit",
            OperatorTag::Store => "Store",
        };
        f.write_str(name)
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorKind::Load { path, schema } => write!(f, "Load({path}) schema={schema:?}"),
            OperatorKind::Filter { predicate } => write!(f, "Filter({predicate})"),
            OperatorKind::Generate {
                nested,
                items,
                output_schema,
            } => {
                let items: Vec<String> = items
                    .iter()
                    .map(|item| {
                        if item.flatten {
                            format!("flatten({})", item.expr)
                        } else {
                            item.expr.to_string()
                        }
                    })
                    .collect();
                write!(f, "Generate([{}], output={output_schema:?}", items.join(", "))?;
                if !nested.is_empty() {
                    write!(f, ", nested={}", nested.len())?;
                }
                write!(f, ")")
            }
            OperatorKind::Join { keys, output_schema } => {
                write!(f, "Join(keys={keys:?}, output={output_schema:?})")
            }
            OperatorKind::Group { keys, output_schema } => {
                write!(f, "Group(keys={keys:?}, output={output_schema:?})")
            }
            OperatorKind::Union => write!(f, "Union"),
            OperatorKind::Distinct => write!(f, "Distinct"),
            OperatorKind::Sort { keys } => {
                let keys: Vec<String> = keys
                    .iter()
                    .map(|k| format!("${}{}", k.column, if k.descending { " desc" } else { "" }))
                    .collect();
                write!(f, "Sort({})", keys.join(", "))
            }
            OperatorKind::Limit { count } => write!(f, "Limit({count})"),
            OperatorKind::Store { path } => write!(f, "Store({path})"),
        }
    }
}

/// A node of an operator graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    pub kind: OperatorKind,
    /// Display alias (the script-level relation name)
    pub alias: Option<String>,
    /// Free-form annotations, never compared
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Operator {
    pub fn new(kind: OperatorKind) -> Self {
        Operator {
            kind,
            alias: None,
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn tag(&self) -> OperatorTag {
        self.kind.tag()
    }
}

impl From<OperatorKind> for Operator {
    fn from(kind: OperatorKind) -> Self {
        Operator::new(kind)
    }
}

// Constructor helpers
/// Column reference
pub fn col(idx: usize) -> Expression {
    Expression::Column(idx)
}

/// Integer constant
pub fn int(value: i64) -> Expression {
    Expression::Int(value)
}

/// String constant
pub fn str_lit(value: &str) -> Expression {
    Expression::Str(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(predicate: Predicate) -> OperatorKind {
        OperatorKind::Filter { predicate }
    }

    #[test]
    fn test_filter_params_equal() {
        let a = filter(Predicate::compare(col(0), ComparisonOp::GreaterThan, int(5)));
        let b = filter(Predicate::compare(col(0), ComparisonOp::GreaterThan, int(5)));
        let c = filter(Predicate::compare(col(1), ComparisonOp::GreaterThan, int(5)));

        assert!(a.params_equal(&b).unwrap());
        assert!(!a.params_equal(&c).unwrap());
    }

    #[test]
    fn test_equality_is_syntactic() {
        // x > 5 and 5 < x mean the same thing but are different operators
        let a = filter(Predicate::compare(col(0), ComparisonOp::GreaterThan, int(5)));
        let b = filter(Predicate::compare(int(5), ComparisonOp::LessThan, col(0)));
        assert!(!a.params_equal(&b).unwrap());
    }

    #[test]
    fn test_unresolved_column_is_an_error() {
        let bad = filter(Predicate::compare(
            Expression::Named("age".to_string()),
            ComparisonOp::Equal,
            int(1),
        ));
        let good = filter(Predicate::True);

        assert!(matches!(
            bad.params_equal(&good),
            Err(EqualityError::UnresolvedColumn(name)) if name == "age"
        ));
        assert!(good.params_equal(&bad).is_err());
    }

    #[test]
    fn test_malformed_join_keys() {
        let bad = OperatorKind::Join {
            keys: vec![vec![0], vec![0, 1]],
            output_schema: vec![],
        };
        assert!(matches!(
            bad.params_equal(&bad.clone()),
            Err(EqualityError::Malformed(_))
        ));
    }

    #[test]
    fn test_output_names_ignored() {
        let a = OperatorKind::projection(&[0, 2], vec!["a".into(), "c".into()]);
        let b = OperatorKind::projection(&[0, 2], vec!["x".into(), "z".into()]);
        assert!(a.params_equal(&b).unwrap());
    }

    #[test]
    fn test_nan_constant_equal_to_itself() {
        let a = filter(Predicate::compare(
            col(0),
            ComparisonOp::Equal,
            Expression::Float(f64::NAN),
        ));
        assert!(a.params_equal(&a.clone()).unwrap());

        let nested = OperatorKind::Generate {
            nested: vec![NestedStep::Filter {
                bag: 1,
                predicate: Predicate::compare(
                    col(0),
                    ComparisonOp::Equal,
                    Expression::Float(f64::NAN),
                ),
            }],
            items: vec![GenerateItem::column(0), GenerateItem::column(1)],
            output_schema: vec!["a".into(), "b".into()],
        };
        assert!(nested.params_equal(&nested.clone()).unwrap());
    }

    #[test]
    fn test_pure_projection() {
        let pure = OperatorKind::projection(&[1, 0], vec!["b".into(), "a".into()]);
        assert_eq!(pure.projected_columns(), Some(vec![1, 0]));

        let computed = OperatorKind::Generate {
            nested: vec![],
            items: vec![GenerateItem {
                expr: Expression::Arithmetic {
                    op: ArithOp::Add,
                    left: Box::new(col(0)),
                    right: Box::new(int(1)),
                },
                flatten: false,
            }],
            output_schema: vec!["a1".into()],
        };
        assert!(!computed.is_pure_projection());

        let flattened = OperatorKind::Generate {
            nested: vec![],
            items: vec![GenerateItem {
                expr: col(1),
                flatten: true,
            }],
            output_schema: vec!["b".into()],
        };
        assert!(!flattened.is_pure_projection());

        let nested = OperatorKind::Generate {
            nested: vec![NestedStep::Distinct { bag: 1 }],
            items: vec![GenerateItem::column(0)],
            output_schema: vec!["a".into()],
        };
        assert!(!nested.is_pure_projection());
    }

    #[test]
    fn test_display() {
        let f = filter(Predicate::compare(col(0), ComparisonOp::GreaterThan, int(5)));
        assert_eq!(f.to_string(), "Filter($0 > 5)");
        assert_eq!(OperatorKind::Limit { count: 3 }.to_string(), "Limit(3)");
        assert_eq!(OperatorTag::Store.to_string(), "Store");
    }
}
