//! `squeaker`: a content-addressed build tool for Smalltalk images.

pub mod commands;
pub mod console_utils;
pub mod opt;
