mod config;
mod governance;
mod integrity;
mod lifecycle;
mod reporting;
