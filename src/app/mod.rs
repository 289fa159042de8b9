// Application layer: one pipeline per review stage.

pub mod pipelines;
