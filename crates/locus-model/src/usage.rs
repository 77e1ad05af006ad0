//! Token usage accounting
//!
//! Usage is a plain value returned alongside each gateway reply and summed
//! where concurrent work joins, never accumulated in shared state.

use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Tokens consumed by one or more language model calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens
    pub prompt_tokens: u64,
    /// Completion tokens
    pub completion_tokens: u64,
    /// Number of calls
    pub calls: u64,
}

impl TokenUsage {
    /// Usage of a single call
    #[inline]
    #[must_use]
    pub fn single(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            calls: 1,
        }
    }

    /// Prompt plus completion tokens
    #[inline]
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
            calls: self.calls + rhs.calls,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for TokenUsage {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// A gateway reply value with the usage it cost
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply<T> {
    /// Parsed value
    pub value: T,
    /// Usage of the call
    pub usage: TokenUsage,
}

impl<T> Reply<T> {
    /// Wrap value with usage
    #[inline]
    #[must_use]
    pub fn new(value: T, usage: TokenUsage) -> Self {
        Self { value, usage }
    }

    /// Transform the value, keeping usage
    #[inline]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reply<U> {
        Reply {
            value: f(self.value),
            usage: self.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_sums() {
        let total: TokenUsage = [TokenUsage::single(10, 5), TokenUsage::single(3, 2)]
            .into_iter()
            .sum();
        assert_eq!(total, TokenUsage { prompt_tokens: 13, completion_tokens: 7, calls: 2 });
        assert_eq!(total.total_tokens(), 20);
    }

    #[test]
    fn reply_map_keeps_usage() {
        let reply = Reply::new("3", TokenUsage::single(1, 1)).map(|s| s.len());
        assert_eq!(reply.value, 1);
        assert_eq!(reply.usage.calls, 1);
    }
}
