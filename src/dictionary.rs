//! The fixed zlib dictionary that primes every header-block context.
//!
//! Peers disagree on whether the trailing NUL belongs to the dictionary, so
//! both forms are exposed and the decompressor accepts either.

macro_rules! dictionary_text {
    () => {
        concat!(
            "optionsgetheadpostputdeletetraceacceptaccept-charsetaccept-encodingaccept-",
            "languageauthorizationexpectfromhostif-modified-sinceif-matchif-none-matchi",
            "f-rangeif-unmodifiedsincemax-forwardsproxy-authorizationrangerefererteuser",
            "-agent10010120020120220320420520630030130230330430530630740040140240340440",
            "5406407408409410411412413414415416417500501502503504505accept-rangesageeta",
            "glocationproxy-authenticatepublicretry-afterservervarywarningwww-authentic",
            "ateallowcontent-basecontent-encodingcache-controlconnectiondatetrailertran",
            "sfer-encodingupgradeviawarningcontent-languagecontent-lengthcontent-locati",
            "oncontent-md5content-rangecontent-typeetagexpireslast-modifiedset-cookieMo",
            "ndayTuesdayWednesdayThursdayFridaySaturdaySundayJanFebMarAprMayJunJulAugSe",
            "pOctNovDecchunkedtext/htmlimage/pngimage/jpgimage/gifapplication/xmlapplic",
            "ation/xhtmltext/plainpublicmax-agecharset=iso-8859-1utf-8gzipdeflateHTTP/1",
            ".1statusversionurl",
        )
    };
}

/// Dictionary including the trailing NUL terminator.
pub const DICTIONARY: &[u8] = concat!(dictionary_text!(), "\0").as_bytes();

/// The same dictionary without its terminator.
pub const DICTIONARY_UNTERMINATED: &[u8] = dictionary_text!().as_bytes();
