mod codec_tests;
mod db_instance_tests;
