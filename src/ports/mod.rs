pub mod music_service;
pub mod transliterate;
