//! Seam to the persisted (source) form of the model.
//!
//! The model never rewrites text itself. It asks a [`Persistence`]
//! implementation to record attach invocations and construction expressions
//! and to evaluate properties against them. [`MemorySource`] is a complete
//! in-memory implementation that renders statements for inspection.

use crate::{
    error::{PersistenceSnafu, Result},
    node::NodeId,
    value::{Map, Value},
};
use compact_str::CompactString;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::fmt::Write;

/// Handle to a construction expression in the persisted form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub u32);

/// Handle to the invocation that attaches a child to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachPoint(pub u32);

pub trait Persistence {
    /// Create a standalone construction of `type_name`.
    fn construct(&mut self, type_name: &str) -> ExprId;

    /// Record `target.method(child)`, placed before the invocation `before`
    /// or last.
    fn add_invocation(
        &mut self,
        target: NodeId,
        child: NodeId,
        method: &str,
        before: Option<AttachPoint>,
    ) -> Result<AttachPoint>;

    fn has_attach_point(&self, at: AttachPoint) -> bool;

    /// Append `new type_name(defaults)` as an extra argument of the invocation
    /// at `at`. Returns the expression and its argument index.
    fn synthesize_argument(
        &mut self,
        at: AttachPoint,
        type_name: &str,
        defaults: &Map,
    ) -> Result<(ExprId, usize)>;

    fn write(&mut self, expr: ExprId, property: &str, value: &Value) -> Result<()>;

    fn evaluate(&self, expr: ExprId, property: &str) -> Option<Value>;

    /// Every value currently recorded for `expr`.
    fn values(&self, expr: ExprId) -> Option<Map>;

    /// Retarget the invocation at `at` to `target`, placed before `before` or last.
    fn move_invocation(
        &mut self,
        at: AttachPoint,
        target: NodeId,
        before: Option<AttachPoint>,
    ) -> Result<()>;

    /// Drop the invocation and every argument expression synthesized into it.
    fn remove_invocation(&mut self, at: AttachPoint);

    fn remove_expr(&mut self, expr: ExprId);

    /// Human-readable statements, one per line.
    fn render(&self) -> String;
}

#[derive(Debug, Clone)]
struct Construct {
    type_name: CompactString,
    values: Map,
}

#[derive(Debug, Clone)]
struct Invocation {
    point: AttachPoint,
    target: NodeId,
    method: CompactString,
    child: NodeId,
    arguments: SmallVec<[ExprId; 1]>,
}

#[derive(Debug, Default)]
pub struct MemorySource {
    next_id: u32,
    constructs: FxHashMap<ExprId, Construct>,
    invocations: Vec<Invocation>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn position(&self, at: AttachPoint) -> Option<usize> {
        self.invocations.iter().position(|inv| inv.point == at)
    }

    fn insert_position(&self, before: Option<AttachPoint>) -> Result<usize> {
        match before {
            None => Ok(self.invocations.len()),
            Some(at) => self.position(at).ok_or_else(|| unknown_point(at)),
        }
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.len()
    }

    pub fn construct_count(&self) -> usize {
        self.constructs.len()
    }
}

fn unknown_point(at: AttachPoint) -> crate::error::Error {
    PersistenceSnafu {
        message: format!("unknown attach point {}", at.0),
    }
    .build()
}

impl Persistence for MemorySource {
    fn construct(&mut self, type_name: &str) -> ExprId {
        let expr = ExprId(self.next());
        self.constructs.insert(
            expr,
            Construct {
                type_name: type_name.into(),
                values: Map::new(),
            },
        );
        expr
    }

    fn add_invocation(
        &mut self,
        target: NodeId,
        child: NodeId,
        method: &str,
        before: Option<AttachPoint>,
    ) -> Result<AttachPoint> {
        let index = self.insert_position(before)?;
        let point = AttachPoint(self.next());
        self.invocations.insert(
            index,
            Invocation {
                point,
                target,
                method: method.into(),
                child,
                arguments: SmallVec::new(),
            },
        );
        Ok(point)
    }

    fn has_attach_point(&self, at: AttachPoint) -> bool {
        self.position(at).is_some()
    }

    fn synthesize_argument(
        &mut self,
        at: AttachPoint,
        type_name: &str,
        defaults: &Map,
    ) -> Result<(ExprId, usize)> {
        let index = self.position(at).ok_or_else(|| unknown_point(at))?;
        let expr = ExprId(self.next());
        self.constructs.insert(
            expr,
            Construct {
                type_name: type_name.into(),
                values: defaults.clone(),
            },
        );
        let invocation = &mut self.invocations[index];
        invocation.arguments.push(expr);
        // argument 0 is the child itself
        Ok((expr, invocation.arguments.len()))
    }

    fn write(&mut self, expr: ExprId, property: &str, value: &Value) -> Result<()> {
        let construct = self.constructs.get_mut(&expr).ok_or_else(|| {
            PersistenceSnafu {
                message: format!("unknown expression {}", expr.0),
            }
            .build()
        })?;
        construct.values.insert(property, value.clone());
        Ok(())
    }

    fn evaluate(&self, expr: ExprId, property: &str) -> Option<Value> {
        self.constructs.get(&expr)?.values.get(property).cloned()
    }

    fn values(&self, expr: ExprId) -> Option<Map> {
        self.constructs.get(&expr).map(|c| c.values.clone())
    }

    fn move_invocation(
        &mut self,
        at: AttachPoint,
        target: NodeId,
        before: Option<AttachPoint>,
    ) -> Result<()> {
        let from = self.position(at).ok_or_else(|| unknown_point(at))?;
        let mut invocation = self.invocations.remove(from);
        let to = match self.insert_position(before) {
            Ok(to) => to,
            Err(err) => {
                self.invocations.insert(from, invocation);
                return Err(err);
            },
        };
        invocation.target = target;
        self.invocations.insert(to, invocation);
        Ok(())
    }

    fn remove_invocation(&mut self, at: AttachPoint) {
        if let Some(index) = self.position(at) {
            let invocation = self.invocations.remove(index);
            for expr in invocation.arguments {
                self.constructs.remove(&expr);
            }
        }
    }

    fn remove_expr(&mut self, expr: ExprId) {
        self.constructs.remove(&expr);
        for invocation in &mut self.invocations {
            invocation.arguments.retain(|arg| *arg != expr);
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for inv in &self.invocations {
            let _ = write!(out, "{}.{}({}", inv.target, inv.method, inv.child);
            for expr in &inv.arguments {
                if let Some(construct) = self.constructs.get(expr) {
                    let _ = write!(out, ", new {}(", construct.type_name);
                    for (i, (k, v)) in construct.values.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        let _ = write!(out, "{k}={v}");
                    }
                    out.push(')');
                }
            }
            out.push_str(");\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocations_respect_before_position() {
        let mut source = MemorySource::new();
        let a = source
            .add_invocation(NodeId(1), NodeId(2), "add", None)
            .unwrap();
        source
            .add_invocation(NodeId(1), NodeId(3), "add", Some(a))
            .unwrap();

        assert_eq!(source.render(), "n1.add(n3);\nn1.add(n2);\n");
    }

    #[test]
    fn synthesized_argument_renders_with_values() {
        let mut source = MemorySource::new();
        let at = source
            .add_invocation(NodeId(1), NodeId(2), "add", None)
            .unwrap();
        let defaults: Map = [("x", 10), ("y", 10)].into_iter().collect();
        let (expr, index) = source.synthesize_argument(at, "BoxData", &defaults).unwrap();
        source.write(expr, "x", &Value::I64(20)).unwrap();

        assert_eq!(index, 1);
        assert_eq!(source.evaluate(expr, "x"), Some(Value::I64(20)));
        assert_eq!(source.render(), "n1.add(n2, new BoxData(x=20, y=10));\n");
    }

    #[test]
    fn removing_invocation_drops_its_arguments() {
        let mut source = MemorySource::new();
        let at = source
            .add_invocation(NodeId(1), NodeId(2), "add", None)
            .unwrap();
        let (expr, _) = source.synthesize_argument(at, "BoxData", &Map::new()).unwrap();

        source.remove_invocation(at);
        assert!(!source.has_attach_point(at));
        assert_eq!(source.evaluate(expr, "x"), None);
        assert_eq!(source.construct_count(), 0);
    }

    #[test]
    fn move_to_unknown_point_leaves_order_intact() {
        let mut source = MemorySource::new();
        let a = source
            .add_invocation(NodeId(1), NodeId(2), "add", None)
            .unwrap();
        source
            .add_invocation(NodeId(1), NodeId(3), "add", None)
            .unwrap();

        assert!(source
            .move_invocation(a, NodeId(9), Some(AttachPoint(999)))
            .is_err());
        assert_eq!(source.render(), "n1.add(n2);\nn1.add(n3);\n");
    }
}
