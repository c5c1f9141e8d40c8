//! Behavior tests driven through an in-memory mock transport.

mod support;
