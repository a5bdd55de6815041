//! Scenario tests for the full order pipeline against a scripted endpoint
