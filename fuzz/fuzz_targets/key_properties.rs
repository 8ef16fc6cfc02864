#![no_main]

use libfuzzer_sys::fuzz_target;

use httpcache::cache::{Key, KeyProperties};

fuzz_target!(|data: &[u8]| {
    let Ok(properties) = serde_json::from_slice::<KeyProperties>(data) else {
        return;
    };
    let Ok(key) = Key::from_properties(&properties) else {
        return;
    };

    let reparsed = Key::from_properties(&key.to_properties())
        .expect("serialized key must parse back");
    assert_eq!(reparsed, key);
    assert_eq!(reparsed.storage_id(), key.storage_id());
});
