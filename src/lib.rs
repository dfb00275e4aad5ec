// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
pub mod addons;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod kubectl;
pub mod kubernetes;
pub mod retry;
pub mod tester;
pub mod ui;

#[cfg(test)]
mod test_utils;
