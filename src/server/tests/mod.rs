mod config;
mod secure;
