//! Reader and writer for the EWFv1 (Expert Witness Format) evidence
//! container.

pub mod ewf;

