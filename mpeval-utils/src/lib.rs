//! Utility library for the MPEVAL project

pub mod pcap_utils;
