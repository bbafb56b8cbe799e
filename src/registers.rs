//! Register IDs for GT911

macro_rules! register_id {
    ($name:ident, $addr:literal) => {
        $crate::paste::paste! {
            pub const [<$name:upper>]: u16 = $addr;
        }
    };
}

register_id!(CONFIG_VERSION, 0x8047);
register_id!(X_OUTPUT_MAX, 0x8048);
register_id!(Y_OUTPUT_MAX, 0x804A);
register_id!(TOUCH_NUMBER, 0x804C);
register_id!(MODULE_SWITCH_1, 0x804D);
register_id!(REFRESH_RATE, 0x8056);
register_id!(CONFIG_CHECKSUM, 0x80FF);
register_id!(CONFIG_FRESH, 0x8100);
register_id!(PRODUCT_ID, 0x8140);
register_id!(FIRMWARE_VERSION, 0x8144);
register_id!(VENDOR_ID, 0x814A);
register_id!(COORD_STATUS, 0x814E);
register_id!(POINT_1, 0x814F);
