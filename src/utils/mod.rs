pub mod bed;
pub mod command;
pub mod fastx;
pub mod file;
pub mod sambam;
pub mod samples;
pub mod stats;
pub mod streams;
pub mod system;
pub mod vcf;
