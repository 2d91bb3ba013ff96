//! Behavioural scenarios for replication-group orchestration.

mod orchestration;
