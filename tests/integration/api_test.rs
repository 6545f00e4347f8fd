//! HTTP surface tests over the composed router

#![allow(dead_code)]

mod common;
mod http;
