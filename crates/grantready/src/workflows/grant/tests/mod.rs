mod audit;
mod common;
