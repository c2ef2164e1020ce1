//! Structure tags of Bolt messages, per protocol generation.

pub type MessageTable = &'static [(u8, &'static str)];

pub const SERVER_MESSAGES: MessageTable = &[
    (0x70, "SUCCESS"),
    (0x71, "RECORD"),
    (0x7E, "IGNORED"),
    (0x7F, "FAILURE"),
];

pub const V1_CLIENT_MESSAGES: MessageTable = &[
    (0x01, "INIT"),
    (0x0E, "ACK_FAILURE"),
    (0x0F, "RESET"),
    (0x10, "RUN"),
    (0x2F, "DISCARD_ALL"),
    (0x3F, "PULL_ALL"),
];

pub const V3_CLIENT_MESSAGES: MessageTable = &[
    (0x01, "HELLO"),
    (0x02, "GOODBYE"),
    (0x0F, "RESET"),
    (0x10, "RUN"),
    (0x11, "BEGIN"),
    (0x12, "COMMIT"),
    (0x13, "ROLLBACK"),
    (0x2F, "DISCARD_ALL"),
    (0x3F, "PULL_ALL"),
];

pub const V4_CLIENT_MESSAGES: MessageTable = &[
    (0x01, "HELLO"),
    (0x02, "GOODBYE"),
    (0x0F, "RESET"),
    (0x10, "RUN"),
    (0x11, "BEGIN"),
    (0x12, "COMMIT"),
    (0x13, "ROLLBACK"),
    (0x2F, "DISCARD"),
    (0x3F, "PULL"),
];

// 4.3 adds ROUTE.
pub const V4_3_CLIENT_MESSAGES: MessageTable = &[
    (0x01, "HELLO"),
    (0x02, "GOODBYE"),
    (0x0F, "RESET"),
    (0x10, "RUN"),
    (0x11, "BEGIN"),
    (0x12, "COMMIT"),
    (0x13, "ROLLBACK"),
    (0x2F, "DISCARD"),
    (0x3F, "PULL"),
    (0x66, "ROUTE"),
];

// 5.1 splits authentication out of HELLO.
pub const V5_1_CLIENT_MESSAGES: MessageTable = &[
    (0x01, "HELLO"),
    (0x02, "GOODBYE"),
    (0x0F, "RESET"),
    (0x10, "RUN"),
    (0x11, "BEGIN"),
    (0x12, "COMMIT"),
    (0x13, "ROLLBACK"),
    (0x2F, "DISCARD"),
    (0x3F, "PULL"),
    (0x66, "ROUTE"),
    (0x6A, "LOGON"),
    (0x6B, "LOGOFF"),
];

pub const V5_4_CLIENT_MESSAGES: MessageTable = &[
    (0x01, "HELLO"),
    (0x02, "GOODBYE"),
    (0x0F, "RESET"),
    (0x10, "RUN"),
    (0x11, "BEGIN"),
    (0x12, "COMMIT"),
    (0x13, "ROLLBACK"),
    (0x2F, "DISCARD"),
    (0x3F, "PULL"),
    (0x54, "TELEMETRY"),
    (0x66, "ROUTE"),
    (0x6A, "LOGON"),
    (0x6B, "LOGOFF"),
];

pub fn name_of(table: MessageTable, tag: u8) -> Option<&'static str> {
    table.iter().find(|(t, _)| *t == tag).map(|(_, name)| *name)
}

pub fn tag_of(table: MessageTable, name: &str) -> Option<u8> {
    table.iter().find(|(_, n)| *n == name).map(|(tag, _)| *tag)
}
