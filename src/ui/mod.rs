//! Renderizado de respuestas del bot como tarjetas de texto.

pub mod embeds;
