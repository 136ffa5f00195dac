//! Runnable examples for `txt2img_core` live under `examples/`.
