use object::{Value, ValueArray};

use crate::error::{RuntimeError, VmError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackInfo {
    /// Values the stack holds before it overflows, or its initial
    /// reservation when growable.
    pub capacity: usize,
    pub growable: bool,
}

impl Default for StackInfo {
    fn default() -> Self {
        Self {
            capacity: 256,
            growable: false,
        }
    }
}

/// The operand stack. A fixed stack faults on overflow; a growable one only
/// fails when memory runs out.
#[derive(Debug, Clone)]
pub struct OperandStack {
    values: ValueArray,
    capacity: usize,
    growable: bool,
}

impl OperandStack {
    pub fn new(info: &StackInfo) -> Result<Self, VmError> {
        Ok(Self {
            values: ValueArray::with_capacity(info.capacity)?,
            capacity: info.capacity,
            growable: info.growable,
        })
    }

    #[inline(always)]
    pub fn push(&mut self, value: Value) -> Result<(), VmError> {
        if !self.growable && self.values.len() >= self.capacity {
            return Err(RuntimeError::StackOverflow {
                capacity: self.capacity,
            }
            .into());
        }
        self.values.push(value)?;
        Ok(())
    }

    /// Fails unless at least `needed` values are on the stack.
    #[inline(always)]
    pub fn require(&self, op: &'static str, needed: usize) -> Result<(), RuntimeError> {
        let depth = self.values.len();
        if depth < needed {
            return Err(RuntimeError::StackUnderflow { op, needed, depth });
        }
        Ok(())
    }

    #[inline(always)]
    pub fn pop(&mut self, op: &'static str) -> Result<Value, RuntimeError> {
        self.require(op, 1)?;
        self.values.pop().ok_or(RuntimeError::StackUnderflow {
            op,
            needed: 1,
            depth: 0,
        })
    }

    /// Pops two values, returning them in push order.
    #[inline(always)]
    pub fn pop2(&mut self, op: &'static str) -> Result<(Value, Value), RuntimeError> {
        self.require(op, 2)?;
        let b = self.pop(op)?;
        let a = self.pop(op)?;
        Ok((a, b))
    }

    /// Gets the nth value from the top of the stack (0-indexed).
    #[must_use]
    pub fn peek(&self, n: usize) -> Option<Value> {
        let depth = self.values.len();
        if n >= depth {
            return None;
        }
        self.values.get(depth - 1 - n)
    }

    pub fn swap_top(&mut self, op: &'static str) -> Result<(), RuntimeError> {
        self.require(op, 2)?;
        let top = self.values.len() - 1;
        self.values.as_mut_slice().swap(top, top - 1);
        Ok(())
    }

    #[inline(always)]
    pub fn depth(&self) -> usize {
        self.values.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn truncate(&mut self, depth: usize) {
        self.values.truncate(depth);
    }

    pub fn clear(&mut self) {
        self.values.truncate(0);
    }

    /// Returns the active portion of the stack, bottom first.
    #[must_use]
    pub fn as_slice(&self) -> &[Value] {
        self.values.as_slice()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_growable(&self) -> bool {
        self.growable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(capacity: usize) -> OperandStack {
        OperandStack::new(&StackInfo {
            capacity,
            growable: false,
        })
        .unwrap()
    }

    #[test]
    fn fixed_stack_overflows() {
        let mut stack = fixed(2);
        stack.push(Value::Int(1)).unwrap();
        stack.push(Value::Int(2)).unwrap();
        let err = stack.push(Value::Int(3)).unwrap_err();
        assert!(matches!(
            err,
            VmError::Runtime(RuntimeError::StackOverflow { capacity: 2 })
        ));
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn growable_stack_grows() {
        let mut stack = OperandStack::new(&StackInfo {
            capacity: 1,
            growable: true,
        })
        .unwrap();
        for i in 0..100 {
            stack.push(Value::Int(i)).unwrap();
        }
        assert_eq!(stack.depth(), 100);
        assert_eq!(stack.peek(0), Some(Value::Int(99)));
    }

    #[test]
    fn underflow_reports_depth() {
        let mut stack = fixed(4);
        stack.push(Value::Nil).unwrap();
        assert_eq!(
            stack.pop2("add"),
            Err(RuntimeError::StackUnderflow {
                op: "add",
                needed: 2,
                depth: 1
            })
        );
        // Nothing was popped by the failed call.
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn pop2_and_swap_keep_order() {
        let mut stack = fixed(4);
        stack.push(Value::Int(1)).unwrap();
        stack.push(Value::Int(2)).unwrap();
        stack.swap_top("swap").unwrap();
        assert_eq!(stack.as_slice(), &[Value::Int(2), Value::Int(1)]);
        assert_eq!(stack.pop2("sub").unwrap(), (Value::Int(2), Value::Int(1)));
        assert!(stack.is_empty());
    }
}
