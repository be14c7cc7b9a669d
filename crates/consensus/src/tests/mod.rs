//! Full supervisor / validator rounds over the in-process network
