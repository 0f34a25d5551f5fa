//! Installment Sales API Library
//!
//! Customers buy products on monthly installment plans financed through the
//! shop's credit cards. This library holds the database layer, the plan
//! lifecycle services, the public file store and the HTTP handlers.
//!
//! # Modules
//!
//! - `api`: HTTP-layer components.
//! - `core`: Domain services, models and errors.
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `schedule`: Amortization and payment schedule generation.
//! - `utilization`: Credit card utilization bookkeeping.
//! - `storage`: Public file store for uploads and contracts.
//! - `forms`: Multipart form decoding.
//! - `routes`: Router assembly.

pub mod api;
pub mod core;

pub mod config;
pub mod contracts;
pub mod credit_cards;
pub mod customers;
pub mod db;
pub mod docs;
pub mod errors;
pub mod forms;
pub mod handlers;
pub mod installment_handler;
pub mod installments;
pub mod models;
pub mod pagination;
pub mod payments;
pub mod products;
pub mod routes;
pub mod schedule;
pub mod storage;
pub mod utilization;
pub mod validation;
