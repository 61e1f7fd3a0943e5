//! End-to-end tests at the request/result level.
//!
//! Each test file covers a specific scenario, composing a request against
//! the bookstore fixture and dispatching it through `execute_query`.

#![cfg(test)]

mod helpers;

mod test_authorization;
mod test_base_query;
mod test_callback;
mod test_contract_violation;
mod test_count;
mod test_dag_sharing;
mod test_filter_loop;
mod test_key_lookup;
mod test_lazy_hooks;
mod test_random_chains;
mod test_round_trip;
mod test_user_filter;
