#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate lazy_static;

pub mod browser_controller;
pub mod classifier;
pub mod config;
pub mod crawler;
pub mod downloader;
pub mod fetcher;
pub mod page;
pub mod photo;
pub mod runner;
pub mod types;
pub mod utils;
pub mod video;
