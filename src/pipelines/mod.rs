pub mod plastid_consensus;
