//! End-to-end tests for loomir live in `tests/`.
