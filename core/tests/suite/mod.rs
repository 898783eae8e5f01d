// Aggregates all former standalone integration tests as modules.
mod audit_scenarios;
mod github_client;
mod incremental_probing;
