#![deny(unused_imports)]

//! Training-and-explanation pipeline for a cardiovascular-disease risk
//! classifier: data preparation, a small feed-forward network, evaluation
//! metrics, global correlation analysis, and a LIME-style local explainer.

pub mod correlate;
pub mod data;
pub mod evaluate;
pub mod explain;
pub mod model;
pub mod network;
pub mod prepare;
pub mod report;
pub mod train;
