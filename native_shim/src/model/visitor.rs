use crate::Value;

use super::objects::ObjectData;

pub trait Visitable {
    fn visit_edges(&self, visitor: &mut impl Visitor);
}

pub trait Visitor: Sized {
    fn visit(&mut self, value: Value);
}

// visiting an object means visiting only its direct edges,
// the collector drives the transitive walk.
impl Visitable for ObjectData {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        match self {
            ObjectData::Array(elements) => {
                elements.iter().for_each(|&v| visitor.visit(v));
            }
            ObjectData::Hash(pairs) => {
                for &(key, value) in pairs {
                    visitor.visit(key);
                    visitor.visit(value);
                }
            }
            ObjectData::Unit(unit) => {
                visitor.visit(unit.header.name);
                visitor.visit(unit.header.path);
                visitor.visit(unit.header.realpath);
                if let Some(parent) = unit.header.parent {
                    visitor.visit(parent);
                }
            }
            ObjectData::Object { class } => visitor.visit(*class),
            ObjectData::Class(class) => {
                class.constants.iter().for_each(|&(_, v)| visitor.visit(v));
            }
            ObjectData::String(_)
            | ObjectData::Symbol(_)
            | ObjectData::Exception { .. } => (),
        }
    }
}

/// Gray set for the mark phase.
#[derive(Debug, Default)]
pub struct MarkVisitor {
    pub worklist: Vec<usize>,
}

impl Visitor for MarkVisitor {
    fn visit(&mut self, value: Value) {
        if let Some(index) = value.as_reference() {
            self.worklist.push(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CollectVisitor(Vec<Value>);

    impl Visitor for CollectVisitor {
        fn visit(&mut self, value: Value) {
            self.0.push(value);
        }
    }

    #[test]
    fn hash_visits_keys_and_values_in_order() {
        let a = Value::from_reference(1);
        let b = Value::from_fixnum(2);
        let data = ObjectData::Hash(vec![(a, b), (b, a)]);
        let mut visitor = CollectVisitor(Vec::new());
        data.visit_edges(&mut visitor);
        assert_eq!(visitor.0, vec![a, b, b, a]);
    }

    #[test]
    fn mark_visitor_ignores_immediates() {
        let data = ObjectData::Array(vec![
            Value::from_fixnum(1),
            Value::NIL,
            Value::from_reference(7),
        ]);
        let mut visitor = MarkVisitor::default();
        data.visit_edges(&mut visitor);
        assert_eq!(visitor.worklist, vec![7]);
    }
}
