pub mod library_sync;
pub mod transliterate;
pub mod users;
pub mod yandex;
